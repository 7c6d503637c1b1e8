//! Layout templating.
//!
//! The layout string controls both which facets are fetched and how they are
//! arranged in the rendered file content.  `%p` stands for the password,
//! `%o` for the one-time code.  A layout containing neither token renders to
//! itself and never triggers a store invocation.

use zeroize::Zeroizing;

/// Token substituted with the password facet.
pub const PASSWORD_TOKEN: &str = "%p";
/// Token substituted with the one-time-code facet.
pub const OTP_TOKEN: &str = "%o";

pub fn wants_password(layout: &str) -> bool {
    layout.contains(PASSWORD_TOKEN)
}

pub fn wants_otp(layout: &str) -> bool {
    layout.contains(OTP_TOKEN)
}

/// Literal, all-occurrences substitution of `%p` then `%o`.
///
/// Pure and infallible: absent tokens are simply not replaced, empty values
/// collapse to nothing at their position.
pub fn render(layout: &str, password: &str, otp: &str) -> Zeroizing<String> {
    let with_password = Zeroizing::new(layout.replace(PASSWORD_TOKEN, password));
    Zeroizing::new(with_password.replace(OTP_TOKEN, otp))
}
