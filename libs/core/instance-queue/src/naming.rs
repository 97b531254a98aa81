//! Instance naming
//!
//! Each process gets its own queue, named after a stable per-process instance
//! name. In Kubernetes that is the pod's `HOSTNAME`
//! (e.g. `billing-api-7d9f8c6b5-x2kqp`); elsewhere a random name of the same
//! shape is generated.

use rand::Rng;
use std::env;
use tracing::warn;

/// Instance id used when the name has too few `-` separated segments.
pub const FALLBACK_INSTANCE_ID: &str = "0000000000";

/// Leading segment of generated instance names.
pub const GENERATED_NAME_PREFIX: &str = "iq";

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Per-process instance name: `HOSTNAME` if set, otherwise
/// `iq-<7 letters>-<5 letters>`.
pub fn unique_name() -> String {
    match env::var("HOSTNAME") {
        Ok(hostname) if !hostname.is_empty() => hostname,
        _ => {
            warn!("HOSTNAME unset, generating instance queue name");
            generated_name()
        }
    }
}

fn generated_name() -> String {
    format!(
        "{}-{}-{}",
        GENERATED_NAME_PREFIX,
        random_letters(7),
        random_letters(5)
    )
}

fn random_letters(n: usize) -> String {
    let mut rng = rand::rng();
    (0..n)
        .map(|_| LETTERS[rng.random_range(0..LETTERS.len())] as char)
        .collect()
}

/// Short id used to tag the queue: the second-to-last `-` segment of the
/// instance name (the ReplicaSet hash for a pod name), or
/// [`FALLBACK_INSTANCE_ID`] when the name has fewer than three segments.
pub fn instance_id(instance_name: &str) -> &str {
    let segments: Vec<&str> = instance_name.split('-').collect();
    if segments.len() > 2 {
        segments[segments.len() - 2]
    } else {
        FALLBACK_INSTANCE_ID
    }
}
