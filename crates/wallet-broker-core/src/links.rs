//! Wallet deeplink construction
//!
//! Protocol URIs (relay or pairing) are wrapped in the target wallet's
//! universal link or native scheme so the OS opens the right app.

use crate::catalog::{ConnectionType, Wallet};
use crate::deeplink::UrlOpener;
use url::Url;

/// Build the URL that launches `wallet`.
///
/// With a protocol URI: an installed wallet gets its universal link, then its
/// native scheme, then the raw URI; a missing wallet gets its store link, or
/// the raw URI. Without one: an installed wallet is opened bare.
pub fn wallet_link(
    wallet: &Wallet,
    deeplink: Option<&str>,
    kind: &ConnectionType,
    opener: &dyn UrlOpener,
) -> Option<Url> {
    let installed = wallet.installed(opener);
    match deeplink {
        Some(deeplink) if installed => embed(wallet, deeplink, kind),
        Some(deeplink) => wallet
            .app_link()
            .and_then(|link| Url::parse(link).ok())
            .or_else(|| Url::parse(deeplink).ok()),
        None if installed => wallet
            .native()
            .and_then(|native| Url::parse(&format!("{native}///")).ok()),
        None => None,
    }
}

fn embed(wallet: &Wallet, deeplink: &str, kind: &ConnectionType) -> Option<Url> {
    let connection = wallet.connection(kind);
    let encoded = || match wallet.encoding() {
        Some(chars) => percent_encode_chars(deeplink, chars),
        None => deeplink.to_string(),
    };

    let universal = connection
        .and_then(|c| c.universal.as_deref())
        .map(str::trim)
        .filter(|u| !u.is_empty());
    if let Some(url) = universal.and_then(|u| Url::parse(&format!("{u}/wc?uri={}", encoded())).ok())
    {
        return Some(url);
    }

    let native = connection
        .and_then(|c| c.native.as_deref())
        .map(str::trim)
        .filter(|n| !n.is_empty());
    if let Some(url) = native.and_then(|n| Url::parse(&format!("{n}//wc?uri={}", encoded())).ok()) {
        return Some(url);
    }

    Url::parse(deeplink).ok()
}

/// Percent-encode exactly the characters listed in `chars`
pub fn percent_encode_chars(input: &str, chars: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if chars.contains(c) {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// The part of a protocol URI before its query string
pub fn strip_query(uri: &str) -> &str {
    uri.split_once('?').map_or(uri, |(head, _)| head)
}
