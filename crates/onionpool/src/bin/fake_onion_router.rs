//! A scripted stand-in for the onion-router client binary, so integration
//! tests never need a real `tor` installed.
//!
//! Normal mode: `fake-onion-router -f <torrc>` reads `SocksPort` and
//! `ControlPort` out of the given file, listens on both, and answers any
//! control-port bytes with `250 OK`. Hash mode:
//! `fake-onion-router --hash-password <plaintext>` prints a deterministic
//! fake hash line and exits.
//!
//! A couple of environment variables let a test script a scenario:
//! - `ONIONPOOL_FAKE_NEVER_READY=1`: never opens the SOCKS port, to exercise
//!   a bootstrap timeout.
//! - `ONIONPOOL_FAKE_CRASH_AFTER_MS=<n>`: exit(1) after `n` milliseconds, to
//!   exercise a mid-start crash.

use std::env;
use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.get(1).map(String::as_str) == Some("--hash-password") {
        let plaintext = args.get(2).map(String::as_str).unwrap_or("");
        println!("16:{:032X}", fake_digest(plaintext));
        return;
    }

    let torrc_path = match args
        .iter()
        .position(|a| a == "-f")
        .and_then(|i| args.get(i + 1))
    {
        Some(p) => p.clone(),
        None => {
            eprintln!("fake-onion-router: expected -f <torrc>");
            std::process::exit(1);
        }
    };

    let contents = fs::read_to_string(&torrc_path).unwrap_or_default();
    let socks_port = extract_port(&contents, "SocksPort").unwrap_or_else(|| {
        eprintln!("fake-onion-router: no SocksPort in {torrc_path}");
        std::process::exit(1);
    });
    let control_port = extract_port(&contents, "ControlPort").unwrap_or_else(|| {
        eprintln!("fake-onion-router: no ControlPort in {torrc_path}");
        std::process::exit(1);
    });

    if let Ok(ms) = env::var("ONIONPOOL_FAKE_CRASH_AFTER_MS").unwrap_or_default().parse::<u64>() {
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(ms));
            std::process::exit(1);
        });
    }

    let control_listener = TcpListener::bind(("127.0.0.1", control_port))
        .unwrap_or_else(|e| panic!("binding control port {control_port}: {e}"));
    thread::spawn(move || serve_control(control_listener));

    if env::var("ONIONPOOL_FAKE_NEVER_READY").is_ok() {
        loop {
            thread::sleep(Duration::from_secs(3600));
        }
    }

    let socks_listener = TcpListener::bind(("127.0.0.1", socks_port))
        .unwrap_or_else(|e| panic!("binding socks port {socks_port}: {e}"));
    serve_socks(socks_listener);
}

/// Accept and immediately drop SOCKS connections; their existence is all
/// the readiness and health probes check for.
fn serve_socks(listener: TcpListener) -> ! {
    loop {
        let _ = listener.accept();
    }
}

/// Answer every control-port connection with `250 OK`, matching the only
/// exchange the supervisor ever issues (`AUTHENTICATE "..."`).
fn serve_control(listener: TcpListener) -> ! {
    loop {
        if let Ok((mut stream, _)) = listener.accept() {
            thread::spawn(move || {
                let mut buf = [0u8; 256];
                if stream.read(&mut buf).is_ok() {
                    let _ = stream.write_all(b"250 OK\r\n");
                }
            });
        }
    }
}

/// Pull the integer value out of a `Keyword value` line.
fn extract_port(contents: &str, keyword: &str) -> Option<u16> {
    contents.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        if parts.next() == Some(keyword) {
            parts.next()?.parse().ok()
        } else {
            None
        }
    })
}

/// A cheap, deterministic stand-in for a real password hash. Not
/// cryptographically meaningful; only needs to be a function of its input
/// so tests can assert the supervisor never logs the plaintext itself.
fn fake_digest(input: &str) -> u128 {
    let mut acc: u128 = 0xcbf2_9ce4_8422_2325;
    for b in input.bytes() {
        acc ^= u128::from(b);
        acc = acc.wrapping_mul(0x0000_0100_0000_01b3);
    }
    acc
}
