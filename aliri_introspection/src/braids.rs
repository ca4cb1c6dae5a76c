use aliri_braid::braid;
use std::fmt;

/// Writes at most `limit - 1` characters of `value`, followed by an
/// ellipsis when anything was cut
fn write_prefix(value: &str, f: &mut fmt::Formatter, default_limit: usize) -> fmt::Result {
    let limit = f.width().unwrap_or(default_limit);
    if limit <= 1 {
        return f.write_str("…");
    }

    match value.char_indices().nth(limit - 1) {
        Some((cut, _)) => {
            f.write_str(&value[..cut])?;
            f.write_str("…")
        }
        None => f.write_str(value),
    }
}

macro_rules! redacted {
    ($ty:ty, $label:literal, debug_prefix = $prefix:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if !f.alternate() {
                    return f.write_str(concat!("***", $label, "***"));
                }
                f.write_str("\"")?;
                write_prefix(self.as_str(), f, $prefix)?;
                f.write_str("\"")
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if !f.alternate() {
                    return f.write_str(concat!("***", $label, "***"));
                }
                write_prefix(self.as_str(), f, usize::MAX)
            }
        }
    };
}

/// The client identifier presented to the introspection endpoint
#[braid(serde)]
pub struct ClientId;

/// The client secret presented to the introspection endpoint
///
/// Formatting this value with `{}` or `{:?}` does not reveal the secret.
/// The alternate forms (`{:#}` and `{:#?}`) reveal a prefix, limited by
/// the requested width.
#[braid(serde, debug = "owned", display = "owned")]
pub struct ClientSecret;

redacted!(ClientSecretRef, "CLIENT SECRET", debug_prefix = 5);

/// An access token used as a bearer credential when calling the
/// introspection endpoint
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

redacted!(AccessTokenRef, "ACCESS TOKEN", debug_prefix = 15);
