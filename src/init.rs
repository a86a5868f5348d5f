use ctor::ctor;

#[ctor]
fn init() {
    // RUST_LOG still overrides the default level
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
