use failure::Fail;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Config,
    Launch,
    Reference,
    Sync,
    Report,
}

#[derive(Fail, Debug)]
pub enum Add2Error {
    /// Rejected on the host before anything reaches the device stream
    #[fail(display = "Precondition violated during {:?} step: {}", step, reason)]
    Precondition { step: Step, reason: String },

    #[fail(
        display = "Cannot allocate {} elements on device {}",
        len, ordinal
    )]
    Allocation { ordinal: usize, len: usize },

    #[fail(display = "Cannot initialize device {}: {}", ordinal, message)]
    DeviceInit { ordinal: usize, message: String },

    /// Sticky: once raised, every later command on the device fails with it
    #[fail(display = "Device {} faulted: {}", ordinal, message)]
    DeviceFault { ordinal: usize, message: String },

    #[fail(
        display = "Error during {:?} step: {:?}, error: {:?}",
        step, comment, error
    )]
    OtherError {
        step: Step,
        comment: String,
        error: failure::Error,
    },
}

pub fn precondition(step: Step, reason: impl Into<String>) -> Add2Error {
    Add2Error::Precondition {
        step,
        reason: reason.into(),
    }
}

pub fn err_msg(step: Step, comment: &str) -> Add2Error {
    Add2Error::OtherError {
        step,
        comment: comment.to_owned(),
        error: failure::err_msg(comment.to_owned()),
    }
}

pub type Result<T> = ::std::result::Result<T, Add2Error>;

pub trait Logging {
    type T;
    fn log_unwrap(self, step: Step) -> Result<Self::T>;
    fn log(self, step: Step, comment: &str) -> Result<Self::T>;
}

impl<T, E: Into<failure::Error>> Logging for ::std::result::Result<T, E> {
    type T = T;

    fn log_unwrap(self, step: Step) -> Result<Self::T> {
        self.log(step, "Unknown Error")
    }

    fn log(self, step: Step, comment: &str) -> Result<Self::T> {
        self.map_err(|e| Add2Error::OtherError {
            step,
            comment: comment.to_owned(),
            error: e.into(),
        })
    }
}
