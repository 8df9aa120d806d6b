// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use libfuzzer_sys::fuzz_target;
use panopticon::gateway::{intents, GatewayPayload, Session};

// Arbitrary frames must never panic the protocol state machine
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(payload) = GatewayPayload::parse(text) else {
        return;
    };
    let mut session = Session::new("fuzz", intents::ARCHIVE);
    let _ = session.handle(payload);
    let _ = session.heartbeat();
});
