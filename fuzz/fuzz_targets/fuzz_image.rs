// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use libfuzzer_sys::fuzz_target;
use mathlens::imaging::{detect_mime, prepare_for_model, rotate_bytes, Rotation};

fuzz_target!(|data: &[u8]| {
    if detect_mime(data).is_ok() {
        let _ = rotate_bytes(data, Rotation::Quarter, 80);
        let _ = prepare_for_model(data, 256, 80);
    }
});
