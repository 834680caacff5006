use crate::domain::errors::ErrorKind;

/// The broker's PDT rejection carries this code in the error body.
const PDT_REJECTION_CODE: &str = "40310000";

/// Unified response envelope for every gateway operation.
///
/// `success` is authoritative: it is true iff the broker returned a
/// documented success status, including empty-body acknowledgements.
/// Callers must check `success` (and `data` where a payload is expected);
/// a non-empty `data` alone is not a success indicator.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub status_code: u16,
    pub data: Option<T>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub retryable: bool,
}

impl<T> ApiResponse<T> {
    pub fn ok(status_code: u16, data: T) -> Self {
        Self {
            success: true,
            status_code,
            data: Some(data),
            error_kind: None,
            error_message: None,
            retryable: false,
        }
    }

    pub fn err(
        status_code: u16,
        kind: ErrorKind,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            success: false,
            status_code,
            data: None,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            retryable,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.success && self.data.is_some()
    }

    pub fn kind_is(&self, kind: ErrorKind) -> bool {
        self.error_kind == Some(kind)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
        ApiResponse {
            success: self.success,
            status_code: self.status_code,
            data: self.data.map(f),
            error_kind: self.error_kind,
            error_message: self.error_message,
            retryable: self.retryable,
        }
    }

    /// Carry an error envelope across a payload type change.
    pub fn cast_err<U>(self) -> ApiResponse<U> {
        ApiResponse {
            success: false,
            status_code: self.status_code,
            data: None,
            error_kind: self.error_kind.or(Some(ErrorKind::Other)),
            error_message: self.error_message,
            retryable: self.retryable,
        }
    }
}

/// Outcome of classifying one broker HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Success,
    Failure { kind: ErrorKind, retryable: bool },
}

/// Classify a broker response status + body.
///
/// 2xx (201 on create and 204 on cancel included) is success. 403 with the
/// broker's PDT code is a PDT violation. 422 with the quantity-held message
/// is caller-retryable after cancellation. 429 and 5xx are transient.
pub fn classify(status: u16, body: &str) -> Classification {
    if (200..300).contains(&status) {
        return Classification::Success;
    }

    let lowered = body.to_ascii_lowercase();
    match status {
        401 => Classification::Failure {
            kind: ErrorKind::Auth,
            retryable: false,
        },
        403 => {
            if body.contains(PDT_REJECTION_CODE) || lowered.contains("pattern day trading") {
                Classification::Failure {
                    kind: ErrorKind::PdtViolation,
                    retryable: false,
                }
            } else {
                Classification::Failure {
                    kind: ErrorKind::Auth,
                    retryable: false,
                }
            }
        }
        422 => {
            if lowered.contains("insufficient qty available") {
                Classification::Failure {
                    kind: ErrorKind::QtyHeld,
                    retryable: true,
                }
            } else {
                Classification::Failure {
                    kind: ErrorKind::InvalidOrder,
                    retryable: false,
                }
            }
        }
        429 => Classification::Failure {
            kind: ErrorKind::RateLimited,
            retryable: true,
        },
        500..=599 => Classification::Failure {
            kind: ErrorKind::Network,
            retryable: true,
        },
        _ => Classification::Failure {
            kind: ErrorKind::Other,
            retryable: false,
        },
    }
}
