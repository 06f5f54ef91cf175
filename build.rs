//! Compile Rust code from the gRPC definition of the CSI provider plugin
//! interface stored in the proto directory.

fn main() {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().unwrap());
    }
    tonic_build::configure()
        .build_server(false)
        .compile_protos(&["proto/provider.proto"], &["proto"])
        .unwrap();
    println!("cargo:rerun-if-changed=proto/provider.proto");
}
