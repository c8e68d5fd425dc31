use std::{borrow::Cow, fmt, io};

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Exclusive access to the device was denied.
    Access,
    /// No matching device, format, frame, or frame interval.
    NotFound,
    /// The handle is already streaming.
    Busy,
    /// A caller-supplied parameter is not supported by the device.
    InvalidParam,
    /// The device presented malformed descriptors or rejected negotiation.
    InvalidDevice,
    /// The transport reported a transfer error.
    Io,
    /// A control transfer exceeded its deadline.
    Timeout,
    /// Buffer allocation failed.
    NoMem,
    /// The requested mode cannot be entered (eg. insufficient bandwidth).
    InvalidMode,
    /// Anything else.
    Other,
}

pub struct Error {
    kind: ErrorKind,
    action: Option<Action>,
    detail: Detail,
}

pub(crate) enum Detail {
    Rusb(rusb::Error),
    Io(io::Error),
    Msg(Cow<'static, str>),
    None,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, detail: impl Into<Detail>) -> Self {
        Self {
            kind,
            action: None,
            detail: detail.into(),
        }
    }

    pub(crate) fn during(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub(crate) fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::Io)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(action) = &self.action {
            write!(f, "error while {}: ", action)?;
        }

        match &self.detail {
            Detail::Rusb(e) => write!(f, "{}", e),
            Detail::Io(e) => write!(f, "{}", e),
            Detail::Msg(m) => write!(f, "{}", m),
            Detail::None => write!(f, "{:?}", self.kind),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: ", self.kind)?;
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

impl From<&'static str> for Detail {
    fn from(s: &'static str) -> Self {
        Detail::Msg(s.into())
    }
}

impl From<String> for Detail {
    fn from(s: String) -> Self {
        Detail::Msg(s.into())
    }
}

impl From<rusb::Error> for Error {
    fn from(e: rusb::Error) -> Self {
        let kind = match e {
            rusb::Error::Access => ErrorKind::Access,
            rusb::Error::NotFound => ErrorKind::NotFound,
            rusb::Error::Busy => ErrorKind::Busy,
            rusb::Error::InvalidParam => ErrorKind::InvalidParam,
            rusb::Error::BadDescriptor => ErrorKind::InvalidDevice,
            rusb::Error::Timeout => ErrorKind::Timeout,
            rusb::Error::NoMem => ErrorKind::NoMem,
            rusb::Error::NotSupported => ErrorKind::Other,
            rusb::Error::Io
            | rusb::Error::NoDevice
            | rusb::Error::Pipe
            | rusb::Error::Interrupted
            | rusb::Error::Overflow => ErrorKind::Io,
            _ => ErrorKind::Other,
        };
        Error {
            kind,
            action: None,
            detail: Detail::Rusb(e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            action: None,
            detail: Detail::Io(e),
        }
    }
}

/// A list of actions during which this library might encounter errors.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Action {
    EnumeratingDevices,
    ReadingConfigDescriptor,
    OpeningDevice,
    ReadingControl,
    WritingControl,
    NegotiatingStream,
    StartingStream,
    Streaming,
    ReadingStatus,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::EnumeratingDevices => "enumerating USB devices",
            Action::ReadingConfigDescriptor => "reading the configuration descriptor",
            Action::OpeningDevice => "opening UVC device",
            Action::ReadingControl => "reading a device control",
            Action::WritingControl => "writing a device control",
            Action::NegotiatingStream => "negotiating stream parameters",
            Action::StartingStream => "starting the video stream",
            Action::Streaming => "streaming video",
            Action::ReadingStatus => "listening for status interrupts",
        };
        f.write_str(s)
    }
}

pub(crate) trait ResultExt<T> {
    fn during(self, action: Action) -> Result<T, Error>;
}

impl<T, E: Into<Error>> ResultExt<T> for Result<T, E> {
    fn during(self, action: Action) -> Result<T, Error> {
        self.map_err(|e| e.into().during(action))
    }
}

pub(crate) fn err<T>(
    kind: ErrorKind,
    msg: impl Into<Cow<'static, str>>,
    action: Action,
) -> Result<T, Error> {
    Err(Error::new(kind, Detail::Msg(msg.into())).during(action))
}
