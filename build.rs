fn main() {
    // Inject compile timestamp as the default build_date of the device record
    // This allows tracking when a specific agent binary was built
    let build_date = get_build_date();
    println!("cargo:rustc-env=BUILD_DATE={}", build_date);
}

fn get_build_date() -> String {
    // Generate RFC 3339 timestamp at compile time
    // Format: YYYY-MM-DDTHH:MM:SSZ
    let now = chrono::Utc::now();
    now.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
