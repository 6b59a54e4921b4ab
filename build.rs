fn main() {
    // Only firmware builds link against ESP-IDF; host builds run the library tests.
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os == "espidf" {
        // Propagate ESP-IDF link/cfg/include args from esp-idf-sys.
        if let Err(err) = embuild::build::LinkArgs::output_propagated("ESP_IDF") {
            println!("cargo:warning=esp-idf link args not propagated: {err}");
        }
        if let Err(err) = embuild::build::CfgArgs::output_propagated("ESP_IDF") {
            println!("cargo:warning=esp-idf cfg args not propagated: {err}");
        }
    }

    println!("cargo:rerun-if-env-changed=MQ2_R0_KOHM");
    println!("cargo:rerun-if-env-changed=MQ2_WARNING_PPM");
    println!("cargo:rerun-if-env-changed=MQ2_DANGER_PPM");
}
