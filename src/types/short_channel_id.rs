//! Conversions between the BOLT text short channel id (`HxTxO`) and the
//! daemon's packed numeric form `H<<40 | T<<16 | O`.

use crate::Result;
use crate::ValidationError;

const MAX_BLOCK_HEIGHT: u64 = 1 << 24;
const MAX_TX_INDEX: u64 = 1 << 24;
const MAX_OUTPUT_INDEX: u64 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShortChannelId {
    pub block_height: u32,
    pub tx_index: u32,
    pub output_index: u16,
}

impl ShortChannelId {
    pub fn new(
        block_height: u32,
        tx_index: u32,
        output_index: u16,
    ) -> Result<Self> {
        if u64::from(block_height) >= MAX_BLOCK_HEIGHT || u64::from(tx_index) >= MAX_TX_INDEX {
            return Err(ValidationError::InvalidShortChannelId(format!(
                "{block_height}x{tx_index}x{output_index}"
            ))
            .into());
        }
        Ok(Self {
            block_height,
            tx_index,
            output_index,
        })
    }

    pub fn to_lnd(&self) -> u64 {
        (u64::from(self.block_height) << 40)
            | (u64::from(self.tx_index) << 16)
            | u64::from(self.output_index)
    }

    pub fn from_lnd(value: u64) -> Self {
        Self {
            block_height: (value >> 40) as u32,
            tx_index: ((value >> 16) & (MAX_TX_INDEX - 1)) as u32,
            output_index: (value & (MAX_OUTPUT_INDEX - 1)) as u16,
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || ValidationError::InvalidShortChannelId(text.to_string());
        let parts: Vec<&str> = text.split('x').collect();
        let [h, t, o] = parts[..] else {
            return Err(invalid().into());
        };
        let h = h.parse::<u64>().map_err(|_| invalid())?;
        let t = t.parse::<u64>().map_err(|_| invalid())?;
        let o = o.parse::<u64>().map_err(|_| invalid())?;
        if h >= MAX_BLOCK_HEIGHT || t >= MAX_TX_INDEX || o >= MAX_OUTPUT_INDEX {
            return Err(invalid().into());
        }
        Ok(Self {
            block_height: h as u32,
            tx_index: t as u32,
            output_index: o as u16,
        })
    }
}

impl std::fmt::Display for ShortChannelId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.block_height, self.tx_index, self.output_index)
    }
}

/// `"HxTxO"` to the packed numeric form.
pub fn short_channel_id_to_lnd(text: &str) -> Result<u64> {
    Ok(ShortChannelId::parse(text)?.to_lnd())
}

/// Packed numeric form to `"HxTxO"`.
pub fn lnd_to_short_channel_id(value: u64) -> String {
    ShortChannelId::from_lnd(value).to_string()
}
