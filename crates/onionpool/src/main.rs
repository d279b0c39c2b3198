//! Command-line entry point for the onionpool supervisor.
//!
//! `onionpool` reads a TOML configuration file (plus any `-o key=value`
//! overrides), brings up a pool of onion-router instances behind a load
//! balancer, and runs until interrupted, tearing everything back down in
//! strict reverse order on exit.

fn main() {
    let runtime = tokio_crate::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build the tokio runtime");

    let exit_code = runtime.block_on(onionpool::main());
    std::process::exit(exit_code);
}
