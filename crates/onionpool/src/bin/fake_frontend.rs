//! A scripted stand-in for the load balancer and HTTP filter binaries, so
//! integration tests never need real `haproxy`/`privoxy` installs.
//!
//! Invoked either as `<path> -f <cfg>` (load balancer) or
//! `<path> --no-daemon <cfg>` (filter). Either way, the last non-flag
//! argument is a rendered config file; this binary pulls the first
//! `127.0.0.1:<port>` token out of it and listens there.

use std::env;
use std::fs;
use std::net::TcpListener;

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let config_path = args
        .iter()
        .rev()
        .find(|a| !a.starts_with('-'))
        .unwrap_or_else(|| {
            eprintln!("fake-frontend: expected a config file argument");
            std::process::exit(1);
        });

    let contents = fs::read_to_string(config_path).unwrap_or_else(|e| {
        eprintln!("fake-frontend: reading {config_path}: {e}");
        std::process::exit(1);
    });

    let port = extract_listen_port(&contents).unwrap_or_else(|| {
        eprintln!("fake-frontend: no 127.0.0.1:<port> address in {config_path}");
        std::process::exit(1);
    });

    let listener = TcpListener::bind(("127.0.0.1", port))
        .unwrap_or_else(|e| panic!("binding port {port}: {e}"));

    loop {
        let _ = listener.accept();
    }
}

/// Find the first `127.0.0.1:<port>` address in the text and return its port.
fn extract_listen_port(contents: &str) -> Option<u16> {
    const NEEDLE: &str = "127.0.0.1:";
    let start = contents.find(NEEDLE)? + NEEDLE.len();
    let rest = &contents[start..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
