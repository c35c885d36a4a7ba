use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use thiserror::Error;

/// Conditional-set flags: only-if-absent / only-if-present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Nx,
    Xx,
}

/// What SET should do about the record's expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// No expiry option given; the new record gets none.
    Discard,
    /// KEEPTTL: carry over whatever expiry the old record had.
    Keep,
    /// EX/PX/EXAT/PXAT, resolved to an absolute deadline at parse time.
    ExpireAt(SystemTime),
}

/// The options that may follow the mandatory `SET key value`, in free order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    pub condition: Option<Condition>,
    pub ttl: Ttl,
    pub get_old: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SetOptionError {
    #[error("cannot use more than one expiry arg")]
    ConflictingExpiry,
    #[error("can only set NX or XX, not both")]
    ConflictingCondition,
    #[error("`{0}` requires a value")]
    MissingValue(String),
    #[error("`{1}` is not a valid value for {0}")]
    InvalidValue(String, String),
    #[error("{0} must not be negative")]
    NegativeValue(String),
    #[error("the arg `{0}` is not valid for SET; must be one of EX, PX, EXAT, PXAT, KEEPTTL, NX, XX, GET")]
    UnknownOption(String),
}

impl SetOptions {
    /// Parses the argv slice after `SET key value`. Option names are matched
    /// case-insensitively, the same way command names are.
    pub fn parse(args: &[Bytes]) -> Result<SetOptions, SetOptionError> {
        Self::parse_at(args, SystemTime::now())
    }

    /// Relative deadlines are computed against `now`, injected for tests.
    fn parse_at(args: &[Bytes], now: SystemTime) -> Result<SetOptions, SetOptionError> {
        let mut options = SetOptions {
            condition: None,
            ttl: Ttl::Discard,
            get_old: false,
        };
        let mut args = args.iter();
        while let Some(arg) = args.next() {
            let name = arg.to_ascii_uppercase();
            match name.as_slice() {
                b"GET" => options.get_old = true,
                b"KEEPTTL" => {
                    if options.ttl != Ttl::Discard {
                        return Err(SetOptionError::ConflictingExpiry);
                    }
                    options.ttl = Ttl::Keep;
                }
                b"EX" | b"PX" | b"EXAT" | b"PXAT" => {
                    if options.ttl != Ttl::Discard {
                        return Err(SetOptionError::ConflictingExpiry);
                    }
                    let label = String::from_utf8_lossy(&name).into_owned();
                    let value = args
                        .next()
                        .ok_or_else(|| SetOptionError::MissingValue(label.clone()))?;
                    let amount = parse_amount(&label, value)?;
                    options.ttl = Ttl::ExpireAt(deadline(&name, amount, now));
                }
                b"NX" | b"XX" => {
                    if options.condition.is_some() {
                        return Err(SetOptionError::ConflictingCondition);
                    }
                    options.condition = Some(if name.as_slice() == b"NX" {
                        Condition::Nx
                    } else {
                        Condition::Xx
                    });
                }
                _ => {
                    return Err(SetOptionError::UnknownOption(
                        String::from_utf8_lossy(arg).into_owned(),
                    ));
                }
            }
        }
        Ok(options)
    }
}

fn parse_amount(label: &str, raw: &Bytes) -> Result<u64, SetOptionError> {
    let value: i64 = std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| {
            SetOptionError::InvalidValue(label.to_string(), String::from_utf8_lossy(raw).into_owned())
        })?;
    if value < 0 {
        return Err(SetOptionError::NegativeValue(label.to_string()));
    }
    Ok(value as u64)
}

/// EX/PX are offsets from now; EXAT/PXAT are absolute unix timestamps.
fn deadline(name: &[u8], amount: u64, now: SystemTime) -> SystemTime {
    match name {
        b"EX" => now + Duration::from_secs(amount),
        b"PX" => now + Duration::from_millis(amount),
        b"EXAT" => UNIX_EPOCH + Duration::from_secs(amount),
        b"PXAT" => UNIX_EPOCH + Duration::from_millis(amount),
        _ => unreachable!("caller matched the expiry option names"),
    }
}
