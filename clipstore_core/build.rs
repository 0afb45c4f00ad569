fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    // Compile clipstore.proto (storage + admin services)
    tonic_build::compile_protos("proto/clipstore.proto")?;

    Ok(())
}
