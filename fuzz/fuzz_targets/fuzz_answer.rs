// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use libfuzzer_sys::fuzz_target;
use mathlens::format::{format_math, render_answer};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = format_math(text);
        let html = render_answer(text);
        // Model output must never reach the page as live markup
        assert!(!html.contains("<script"));
        let lower = html.to_ascii_lowercase();
        assert!(!lower.contains("href=\"javascript:"));
        assert!(!lower.contains("src=\"javascript:"));
    }
});
