//! Process exit statuses for `mosaicd`.
//!
//! 2 is left unused because clap exits with it on usage errors.

pub const SUCCESS: i32 = 0;

/// Any fatal error other than a format mismatch.
pub const FAILURE: i32 = 1;

/// A configured camera offers no MJPG format at the requested size.
pub const NO_MATCHING_FORMAT: i32 = 3;

/// Map a fatal error chain to an exit status.
pub fn for_error(err: &anyhow::Error) -> i32 {
    let no_format = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<crate::SessionError>())
        .any(|session_err| session_err.is_no_matching_format());
    if no_format {
        NO_MATCHING_FORMAT
    } else {
        FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::SessionError;

    #[test]
    fn no_matching_format_gets_its_own_status() {
        let err = anyhow::Error::new(SessionError::NoMatchingFormat {
            config: DeviceConfig {
                device: "/dev/video0".to_string(),
                width: 320,
                height: 240,
                target_x: 0,
                target_y: 0,
            },
            available: Vec::new(),
        })
        .context("open cameras");
        assert_eq!(for_error(&err), NO_MATCHING_FORMAT);
    }

    #[test]
    fn other_errors_map_to_failure() {
        let err = anyhow::anyhow!("config file missing");
        assert_eq!(for_error(&err), FAILURE);
        assert_ne!(FAILURE, NO_MATCHING_FORMAT);
        assert_ne!(SUCCESS, FAILURE);
    }
}
