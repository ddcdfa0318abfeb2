//! Status code helpers and the reason phrases this server emits itself.

/// 100 Trying
pub const TRYING: u16 = 100;
/// 180 Ringing
pub const RINGING: u16 = 180;
/// 200 OK
pub const OK: u16 = 200;
/// 402 Payment Required, reused as the parallel-call refusal code
pub const PAYMENT_REQUIRED: u16 = 402;
/// 408 Request Timeout
pub const REQUEST_TIMEOUT: u16 = 408;
/// 481 Call/Transaction Does Not Exist
pub const CALL_DOES_NOT_EXIST: u16 = 481;
/// 487 Request Terminated
pub const REQUEST_TERMINATED: u16 = 487;
/// 491 Request Pending
pub const REQUEST_PENDING: u16 = 491;
/// 500 Server Internal Error
pub const SERVER_INTERNAL_ERROR: u16 = 500;

/// Default reason phrase for a status code
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Trying",
        180 => "Ringing",
        181 => "Call Is Being Forwarded",
        183 => "Session Progress",
        200 => "OK",
        202 => "Accepted",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        480 => "Temporarily Unavailable",
        481 => "Call Leg/Transaction Does Not Exist",
        486 => "Busy Here",
        487 => "Request Terminated",
        488 => "Not Acceptable Here",
        491 => "Request Pending",
        500 => "Server Internal Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        603 => "Decline",
        _ => "Unknown",
    }
}

pub fn is_provisional(code: u16) -> bool {
    (100..200).contains(&code)
}

pub fn is_success(code: u16) -> bool {
    (200..300).contains(&code)
}

/// Final response: 200..=699
pub fn is_final(code: u16) -> bool {
    (200..700).contains(&code)
}

/// Any code a reply may legally carry
pub fn is_valid(code: u16) -> bool {
    (100..700).contains(&code)
}
