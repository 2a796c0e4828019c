//! NIP-13: Proof of Work
//!
//! Difficulty is the number of leading zero bits of the event id. A `nonce`
//! tag may commit to a target: `["nonce", <nonce>, <target>]`.

use crate::nip01::Event;

/// Leading zero bits of a hex id. Non-hex characters end the count.
pub fn difficulty(id_hex: &str) -> u32 {
    let mut bits = 0;
    for c in id_hex.chars() {
        let Some(nibble) = c.to_digit(16) else {
            break;
        };
        if nibble == 0 {
            bits += 4;
            continue;
        }
        bits += nibble.leading_zeros() - 28;
        break;
    }
    bits
}

/// Target difficulty committed in the `nonce` tag, if any.
pub fn committed_target(event: &Event) -> Option<u32> {
    event
        .tags_named("nonce")
        .next()
        .and_then(|tag| tag.get(2))
        .and_then(|target| target.parse().ok())
}

/// Difficulty credited to this event. With a committed target the credit is the
/// target if reached and zero otherwise.
pub fn effective_difficulty(event: &Event) -> u32 {
    let achieved = difficulty(&event.id);
    match committed_target(event) {
        Some(target) if achieved >= target => target,
        Some(_) => 0,
        None => achieved,
    }
}
