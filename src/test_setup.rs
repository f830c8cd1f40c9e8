#[cfg(test)]
#[ctor::ctor]
fn init_tests() {
    // initialize a subscriber only for tests (to capture info and trace logs based on RUST_LOG)
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
