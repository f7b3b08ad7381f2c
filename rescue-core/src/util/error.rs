#[cfg(feature = "use_backtrace")]
use backtrace::Backtrace;

use RecoveryErrorKind::*;

/// Kind of recovery error
#[derive(Clone, Debug, PartialEq)]
pub enum RecoveryErrorKind {
    /// A derivation path was malformed, or can't be derived from the given key
    InvalidPath(String),
    /// An input (key, address, hex string, parameter) could not be used
    InvalidArgument(String),
    /// A revocation chain was asked for an element beyond its capacity
    ExhaustedChain(u64),
    /// A brute force search covered its whole space without a match
    NotFound(String),
    /// The swept value can't cover the fee plus a non-dust output.
    /// Includes the total input value and the computed fee.
    InsufficientValue(String, u64, u64),
    /// A fee can't be split between two outputs without creating dust
    FeeDistribution(String),
    /// Witness construction produced something inconsistent with the matched output
    InvalidWitness(String),
}

// Explicit PartialEq which ignores backtrace.
impl PartialEq for RecoveryError {
    fn eq(&self, other: &RecoveryError) -> bool {
        self.kind == other.kind
    }
}

/// Recovery error
#[derive(Clone)]
pub struct RecoveryError {
    /// The kind of error
    pub kind: RecoveryErrorKind,
    /// A non-resolved backtrace
    #[cfg(feature = "use_backtrace")]
    pub bt: Backtrace,
}

impl RecoveryError {
    /// Resolve the backtrace for display to the user
    #[cfg(feature = "use_backtrace")]
    pub fn resolved_backtrace(&self) -> Backtrace {
        let mut mre = self.clone();
        mre.bt.resolve();
        mre.bt
    }

    /// Return a new RecoveryError with the message prepended
    pub fn prepend_msg(&self, premsg: String) -> RecoveryError {
        let modkind = match &self.kind {
            InvalidPath(s0) => InvalidPath(premsg + &s0),
            InvalidArgument(s0) => InvalidArgument(premsg + &s0),
            ExhaustedChain(index) => ExhaustedChain(*index),
            NotFound(s0) => NotFound(premsg + &s0),
            InsufficientValue(s0, total, fee) => InsufficientValue(premsg + &s0, *total, *fee),
            FeeDistribution(s0) => FeeDistribution(premsg + &s0),
            InvalidWitness(s0) => InvalidWitness(premsg + &s0),
        };
        RecoveryError {
            kind: modkind,
            #[cfg(feature = "use_backtrace")]
            bt: self.bt.clone(),
        }
    }

    /// Whether this error means a search ran out of candidates
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, NotFound(_))
    }
}

impl core::fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let msg: String = self.clone().into();
        f.write_str(&msg)
    }
}

impl core::fmt::Debug for RecoveryError {
    #[cfg(not(feature = "use_backtrace"))]
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("RecoveryError").field("kind", &self.kind).finish()
    }
    #[cfg(feature = "use_backtrace")]
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("RecoveryError")
            .field("kind", &self.kind)
            .field("bt", &self.resolved_backtrace())
            .finish()
    }
}

impl std::error::Error for RecoveryError {}

impl Into<String> for RecoveryError {
    fn into(self) -> String {
        match self.kind {
            InvalidPath(s) => "invalid derivation path: ".to_string() + &s,
            InvalidArgument(s) => "invalid argument: ".to_string() + &s,
            ExhaustedChain(index) => format!("revocation chain exhausted at index {}", index),
            NotFound(s) => "not found: ".to_string() + &s,
            InsufficientValue(s, total, fee) => {
                format!("insufficient value: {} (total {} sat, fee {} sat)", s, total, fee)
            }
            FeeDistribution(s) => "fee distribution: ".to_string() + &s,
            InvalidWitness(s) => "invalid witness: ".to_string() + &s,
        }
    }
}

pub(crate) fn invalid_path_error(msg: impl Into<String>) -> RecoveryError {
    RecoveryError {
        kind: InvalidPath(msg.into()),
        #[cfg(feature = "use_backtrace")]
        bt: Backtrace::new_unresolved(),
    }
}

pub(crate) fn invalid_argument_error(msg: impl Into<String>) -> RecoveryError {
    RecoveryError {
        kind: InvalidArgument(msg.into()),
        #[cfg(feature = "use_backtrace")]
        bt: Backtrace::new_unresolved(),
    }
}

pub(crate) fn exhausted_chain_error(index: u64) -> RecoveryError {
    RecoveryError {
        kind: ExhaustedChain(index),
        #[cfg(feature = "use_backtrace")]
        bt: Backtrace::new_unresolved(),
    }
}

pub(crate) fn not_found_error(msg: impl Into<String>) -> RecoveryError {
    RecoveryError {
        kind: NotFound(msg.into()),
        #[cfg(feature = "use_backtrace")]
        bt: Backtrace::new_unresolved(),
    }
}

pub(crate) fn insufficient_value_error(
    msg: impl Into<String>,
    total: u64,
    fee: u64,
) -> RecoveryError {
    RecoveryError {
        kind: InsufficientValue(msg.into(), total, fee),
        #[cfg(feature = "use_backtrace")]
        bt: Backtrace::new_unresolved(),
    }
}

pub(crate) fn fee_distribution_error(msg: impl Into<String>) -> RecoveryError {
    RecoveryError {
        kind: FeeDistribution(msg.into()),
        #[cfg(feature = "use_backtrace")]
        bt: Backtrace::new_unresolved(),
    }
}

pub(crate) fn invalid_witness_error(msg: impl Into<String>) -> RecoveryError {
    RecoveryError {
        kind: InvalidWitness(msg.into()),
        #[cfg(feature = "use_backtrace")]
        bt: Backtrace::new_unresolved(),
    }
}

/// Return an invalid argument error from the current function
macro_rules! invalid_argument_err {
	($($arg:tt)*) => (
            return Err($crate::util::error::invalid_argument_error(format!(
                "{}: {}",
                $crate::short_function!(),
                format!($($arg)*)
            )))
        )
}

/// Return an invalid witness error from the current function
macro_rules! invalid_witness_err {
	($($arg:tt)*) => (
            return Err($crate::util::error::invalid_witness_error(format!(
                "{}: {}",
                $crate::short_function!(),
                format!($($arg)*)
            )))
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepend_msg_test() {
        let err = not_found_error("no match").prepend_msg("key 3: ".to_string());
        assert_eq!(err.kind, NotFound("key 3: no match".to_string()));
        let err = exhausted_chain_error(7).prepend_msg("ignored: ".to_string());
        assert_eq!(err.kind, ExhaustedChain(7));
    }

    #[test]
    fn display_test() {
        let err = insufficient_value_error("output below dust", 1000, 1500);
        assert_eq!(
            format!("{}", err),
            "insufficient value: output below dust (total 1000 sat, fee 1500 sat)"
        );
        assert!(not_found_error("x").is_not_found());
        assert!(!invalid_path_error("x").is_not_found());
    }

    #[test]
    fn macro_test() {
        fn checks(v: u32) -> Result<u32, RecoveryError> {
            if v > 3 {
                invalid_argument_err!("value {} too large", v);
            }
            Ok(v)
        }
        assert_eq!(checks(2), Ok(2));
        assert_eq!(
            checks(5).unwrap_err().kind,
            InvalidArgument("checks: value 5 too large".to_string())
        );
    }
}
