fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only the client half of the daemon's published API is needed.
    tonic_build::configure()
        .build_server(false)
        .compile_protos(&["proto/lightning.proto", "proto/router.proto"], &["proto"])
        .unwrap_or_else(|e| panic!("protobuf compile error: {}", e));

    Ok(())
}
