use serde::Serialize;
use serde_json::{json, Value};

use crate::attainment::AttainmentError;
use crate::calendar::CalendarError;
use crate::schedule::ScheduleError;

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

pub fn ok(id: &str, result: Value) -> Value {
    json!({ "id": id, "ok": true, "result": result })
}

pub fn err(id: &str, code: &str, message: impl Into<String>, details: Option<Value>) -> Value {
    let body = ErrorBody {
        code,
        message: message.into(),
        details,
    };
    json!({ "id": id, "ok": false, "error": body })
}

/// A rejected request: protocol code, message and optional structured details.
#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(what: &str) -> Self {
        Self::new("not_found", format!("{} not found", what))
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<AttainmentError> for HandlerErr {
    fn from(e: AttainmentError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

impl From<ScheduleError> for HandlerErr {
    fn from(e: ScheduleError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

impl From<CalendarError> for HandlerErr {
    fn from(e: CalendarError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}
