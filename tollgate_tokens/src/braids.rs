use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// A client ID
#[braid(serde)]
pub struct ClientId;

/// A client secret
#[braid(serde, debug = "owned", display = "owned")]
pub struct ClientSecret;

limited_reveal!(ClientSecretRef: "CLIENT SECRET", 5);

/// The resource owner's username, sent with the password grant
#[braid(serde)]
pub struct Username;

/// The resource owner's password, sent with the password grant
#[braid(serde, debug = "owned", display = "owned")]
pub struct Password;

limited_reveal!(PasswordRef: "PASSWORD", 1);

/// An access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

/// A refresh token
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

limited_reveal!(RefreshTokenRef: "REFRESH TOKEN", 5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_hidden_by_default() {
        let token = AccessToken::from_static("eyJhbGciOiJSUzI1NiJ9.payload.signature");

        assert_eq!(format!("{:?}", token), "***ACCESS TOKEN***");
        assert_eq!(format!("{}", token), "***ACCESS TOKEN***");
    }

    #[test]
    fn alternate_debug_reveals_a_bounded_prefix() {
        let secret = ClientSecret::from_static("super-secret-value");

        assert_eq!(format!("{:#?}", secret), "\"supe…\"");
    }

    #[test]
    fn alternate_display_reveals_everything() {
        let token = RefreshToken::from_static("r1-long-refresh");

        assert_eq!(format!("{:#}", token), "r1-long-refresh");
    }

    #[test]
    fn passwords_reveal_nothing_in_alternate_debug() {
        let password = Password::from_static("hunter2");

        assert_eq!(format!("{:#?}", password), "\"…\"");
    }
}
