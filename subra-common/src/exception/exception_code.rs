#![allow(non_snake_case)]

use std::backtrace::Backtrace;
use std::sync::Arc;

use super::exception::{ErrorCode, ErrorCodeBacktrace};

macro_rules! build_exceptions {
    ($($body:ident($code:expr)),*$(,)*) => {
            impl ErrorCode {
                $(
                pub fn $body(display_text: impl Into<String>) -> ErrorCode {
                    let bt = Some(ErrorCodeBacktrace::Origin(Arc::new(Backtrace::capture())));
                    ErrorCode::create(
                        $code,
                        display_text.into(),
                        None,
                        bt,
                    )
                }
                paste::item! {
                    pub fn [< $body:snake _ code >] ()  -> u16{
                        $code
                    }

                    pub fn [< $body  Code >] ()  -> u16{
                        $code
                    }
                }
                )*
            }
    }
}

// Internal errors [0, 2000].
build_exceptions! {
    Ok(0),
    UnImplement(1001),
    IllegalArgument(1002),
    NotFound(1003),
    Conflict(1004),
    IllegalState(1005),
    EmptyQueue(1006),
    CorruptState(1007),
    InvalidExchangeStatus(1008),
    ExchangeDead(1009),
    SchedulerFailed(1010),
    UnknownException(1999),
}
