//! Late-bound automation model
//!
//! The spreadsheet application is driven through an untyped automation
//! surface: members are looked up by name at call time and arguments travel as
//! [`Variant`]s. Nothing about the surface is known until a call is attempted,
//! which is why the adapter probes it with fallback chains.
//!
//! Objects are handed out as `Rc<dyn Dispatch>`. `Rc` is neither `Send` nor
//! `Sync`, so every handle obtained from a host stays on the thread that
//! created the host; the single-context affinity of the automation surface is
//! enforced by the compiler rather than by convention.

use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Failure of one late-bound call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// The object does not expose this member
    #[error("member '{0}' not found")]
    MemberNotFound(String),

    /// The member exists but the call raised
    #[error("'{member}' raised: {message}")]
    Raised { member: String, message: String },

    /// An object was expected but the call returned nothing
    #[error("'{0}' returned no object")]
    NullObject(String),

    /// An argument or return value had the wrong shape
    #[error("'{member}' expected {expected}")]
    TypeMismatch {
        member: String,
        expected: &'static str,
    },
}

impl DispatchError {
    pub fn raised(member: impl Into<String>, message: impl Into<String>) -> Self {
        DispatchError::Raised {
            member: member.into(),
            message: message.into(),
        }
    }

    pub fn type_mismatch(member: impl Into<String>, expected: &'static str) -> Self {
        DispatchError::TypeMismatch {
            member: member.into(),
            expected,
        }
    }
}

pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

/// Value passed to or returned from a late-bound call
#[derive(Clone)]
pub enum Variant {
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Array(Vec<Variant>),
    Object(Rc<dyn Dispatch>),
}

impl Variant {
    /// Unwrap an object reference returned by `member`
    pub fn into_object(self, member: &str) -> DispatchResult<Rc<dyn Dispatch>> {
        match self {
            Variant::Object(obj) => Ok(obj),
            Variant::Empty => Err(DispatchError::NullObject(member.to_string())),
            _ => Err(DispatchError::type_mismatch(member, "an object")),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Variant::Int(v) => Some(*v),
            Variant::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Variant::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::Float(v) => Some(*v),
            Variant::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Variant]> {
        match self {
            Variant::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Loose truthiness used for calls that report success as a return value
    pub fn is_truthy(&self) -> bool {
        match self {
            Variant::Empty => false,
            Variant::Bool(b) => *b,
            Variant::Int(v) => *v != 0,
            Variant::Float(v) => *v != 0.0,
            Variant::Text(s) => !s.is_empty(),
            Variant::Array(items) => !items.is_empty(),
            Variant::Object(_) => true,
        }
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Empty => write!(f, "Empty"),
            Variant::Bool(b) => write!(f, "Bool({})", b),
            Variant::Int(v) => write!(f, "Int({})", v),
            Variant::Float(v) => write!(f, "Float({:?})", v),
            Variant::Text(s) => write!(f, "Text({:?})", s),
            Variant::Array(items) => f.debug_list().entries(items).finish(),
            Variant::Object(obj) => write!(f, "Object({})", obj.type_name()),
        }
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Bool(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Variant::Int(v)
    }
}

impl From<u32> for Variant {
    fn from(v: u32) -> Self {
        Variant::Int(i64::from(v))
    }
}

impl From<u64> for Variant {
    fn from(v: u64) -> Self {
        i64::try_from(v).map(Variant::Int).unwrap_or(Variant::Float(v as f64))
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Float(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::Text(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::Text(v)
    }
}

impl From<Vec<Variant>> for Variant {
    fn from(v: Vec<Variant>) -> Self {
        Variant::Array(v)
    }
}

/// A late-bound automation object
pub trait Dispatch {
    /// Call a method
    fn invoke(&self, member: &str, args: &[Variant]) -> DispatchResult<Variant>;

    /// Read a property, possibly indexed
    fn get(&self, property: &str, args: &[Variant]) -> DispatchResult<Variant>;

    /// Assign a property, possibly indexed
    fn put(&self, property: &str, args: &[Variant], value: Variant) -> DispatchResult<()>;

    /// Short type label for diagnostics
    fn type_name(&self) -> &str {
        "Object"
    }
}

/// Entry point into an automation server
pub trait AutomationHost {
    /// Whether automation is supported at all in this environment
    fn is_available(&self) -> bool;

    /// Attach to a running instance registered under `prog_id`
    fn attach(&self, prog_id: &str) -> DispatchResult<Rc<dyn Dispatch>>;

    /// Start (or obtain) an instance registered under `prog_id`
    fn launch(&self, prog_id: &str) -> DispatchResult<Rc<dyn Dispatch>>;

    /// Short label for logging
    fn name(&self) -> &str;
}

/// Host used where no automation bridge exists
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableHost;

impl AutomationHost for UnavailableHost {
    fn is_available(&self) -> bool {
        false
    }

    fn attach(&self, prog_id: &str) -> DispatchResult<Rc<dyn Dispatch>> {
        Err(DispatchError::raised(prog_id, "automation is not available"))
    }

    fn launch(&self, prog_id: &str) -> DispatchResult<Rc<dyn Dispatch>> {
        Err(DispatchError::raised(prog_id, "automation is not available"))
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}
