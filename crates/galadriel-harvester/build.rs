fn main() -> Result<(), Box<dyn std::error::Error>> {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR")?;
    let proto_path = std::path::Path::new(&manifest_dir).join("proto");
    let protos = [
        proto_path.join("spire/api/types/types.proto"),
        proto_path.join("spire/api/server/bundle/v1/bundle.proto"),
        proto_path.join("spire/api/server/trustdomain/v1/trustdomain.proto"),
    ];

    // use the vendored protoc unless one is provided
    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path().map_err(|e| e.to_string())?;
        // SAFETY: build scripts are single-threaded
        unsafe { std::env::set_var("PROTOC", protoc) };
    }

    tonic_build::configure().compile_protos(&protos, &[proto_path.clone()])?;
    println!("cargo:rerun-if-changed={}", proto_path.display());
    Ok(())
}
