fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // The default build carries the software emulation backend and needs no
    // native libraries. The `system` feature generates bindings against the
    // installed DOCA SDK and links it.
    if std::env::var_os("CARGO_FEATURE_SYSTEM").is_none() {
        return;
    }

    #[cfg(feature = "system")]
    system::generate();
}

#[cfg(feature = "system")]
mod system {
    const DOCA_LIBS: &[&str] = &[
        "doca-common",
        "doca-comch",
        "doca-compress",
        "doca-dma",
        "doca-sha",
        "doca-aes-gcm",
        "doca-erasure-coding",
        "doca-rdma",
        "doca-eth",
        "doca-devemu",
    ];

    pub fn generate() {
        let mut include_args = Vec::new();
        for lib in DOCA_LIBS {
            let pc = pkgconf::Config::new()
                .probe(lib)
                .unwrap_or_else(|e| panic!("pkg-config probe for {lib} failed: {e}"));
            for path in pc.include_paths() {
                include_args.push(format!("-I{}", path.display()));
            }
        }

        let bindings = bindgen::Builder::default()
            .header("src/system/wrapper.h")
            .clang_args(&include_args)
            .allowlist_function("doca_.*")
            .allowlist_type("doca_.*")
            .allowlist_var("DOCA_.*")
            .prepend_enum_name(false)
            .generate()
            .expect("bindgen failed for DOCA headers");

        let out = std::path::PathBuf::from(std::env::var("OUT_DIR").unwrap());
        bindings
            .write_to_file(out.join("bindings.rs"))
            .expect("could not write bindings");
    }
}
