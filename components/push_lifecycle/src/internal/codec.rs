/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Conversion of server-distributed base64url strings into the raw bytes the
//! push service expects as an `applicationServerKey`.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};

use crate::error::Result;

/// Decode a base64url string, with or without its trailing padding.
///
/// The input is padded to a multiple of four characters and the two
/// URL-safe characters are mapped back onto the standard alphabet before
/// decoding.
pub fn decode(input: &str) -> Result<Vec<u8>> {
    let mut standard = String::with_capacity(input.len() + 3);
    standard.extend(input.chars().map(|c| match c {
        '-' => '+',
        '_' => '/',
        c => c,
    }));
    while standard.len() % 4 != 0 {
        standard.push('=');
    }
    Ok(STANDARD.decode(standard)?)
}

/// Unpadded base64url, the form push services hand out key material in.
pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}
