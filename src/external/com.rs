//! COM automation bridge (Windows only)
//!
//! Drives the spreadsheet application through `IDispatch`. Building a
//! [`ComHost`] enters a single-threaded apartment on the calling thread, so the
//! host has to be created on the thread that will make every call. The
//! worker's host factory runs on the `external-sink` thread for that reason.
//!
//! Only scalar arguments are marshalled. Array arguments are rejected with a
//! type mismatch, which sends the write chain on to its per-cell strategies.

use super::dispatch::{AutomationHost, Dispatch, DispatchError, DispatchResult, Variant};
use std::marker::PhantomData;
use std::rc::Rc;
use windows::core::{IUnknown, Interface, BSTR, GUID, PCWSTR, VARIANT};
use windows::Win32::System::Com::{
    CLSIDFromProgID, CoCreateInstance, CoInitializeEx, CoUninitialize, IDispatch,
    CLSCTX_LOCAL_SERVER, COINIT_APARTMENTTHREADED, DISPATCH_FLAGS, DISPATCH_METHOD,
    DISPATCH_PROPERTYGET, DISPATCH_PROPERTYPUT, DISPPARAMS,
};
use windows::Win32::System::Ole::GetActiveObject;

const LOCALE_USER_DEFAULT: u32 = 0x0400;
const DISPID_PROPERTYPUT: i32 = -3;

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn clsid(prog_id: &str) -> DispatchResult<GUID> {
    let name = wide(prog_id);
    unsafe { CLSIDFromProgID(PCWSTR(name.as_ptr())) }
        .map_err(|e| DispatchError::raised(prog_id, e.to_string()))
}

/// Apartment membership of the current thread; left on drop
struct Apartment {
    _not_send: PhantomData<*const ()>,
}

impl Apartment {
    fn enter() -> windows::core::Result<Self> {
        unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED) }.ok()?;
        Ok(Self {
            _not_send: PhantomData,
        })
    }
}

impl Drop for Apartment {
    fn drop(&mut self) {
        unsafe { CoUninitialize() };
    }
}

/// Automation host backed by the Windows COM runtime
pub struct ComHost {
    _apartment: Apartment,
}

impl ComHost {
    /// Enter an apartment on the current thread
    pub fn new() -> windows::core::Result<Self> {
        Ok(Self {
            _apartment: Apartment::enter()?,
        })
    }
}

impl AutomationHost for ComHost {
    fn is_available(&self) -> bool {
        true
    }

    fn attach(&self, prog_id: &str) -> DispatchResult<Rc<dyn Dispatch>> {
        let clsid = clsid(prog_id)?;
        let mut unknown: Option<IUnknown> = None;
        unsafe { GetActiveObject(&clsid, None, &mut unknown) }
            .map_err(|e| DispatchError::raised(prog_id, e.to_string()))?;
        let unknown = unknown.ok_or_else(|| DispatchError::NullObject(prog_id.to_string()))?;
        let dispatch: IDispatch = unknown
            .cast()
            .map_err(|_| DispatchError::type_mismatch(prog_id, "an automation object"))?;
        Ok(Rc::new(ComObject::new(dispatch, "Application")))
    }

    fn launch(&self, prog_id: &str) -> DispatchResult<Rc<dyn Dispatch>> {
        let clsid = clsid(prog_id)?;
        let dispatch: IDispatch = unsafe { CoCreateInstance(&clsid, None, CLSCTX_LOCAL_SERVER) }
            .map_err(|e| DispatchError::raised(prog_id, e.to_string()))?;
        Ok(Rc::new(ComObject::new(dispatch, "Application")))
    }

    fn name(&self) -> &str {
        "com"
    }
}

/// One `IDispatch` reference
pub struct ComObject {
    dispatch: IDispatch,
    type_name: String,
}

impl ComObject {
    fn new(dispatch: IDispatch, type_name: impl Into<String>) -> Self {
        Self {
            dispatch,
            type_name: type_name.into(),
        }
    }

    fn dispid(&self, member: &str) -> DispatchResult<i32> {
        let name = wide(member);
        let names = [PCWSTR(name.as_ptr())];
        let mut id = 0i32;
        unsafe {
            self.dispatch.GetIDsOfNames(
                &GUID::zeroed(),
                names.as_ptr(),
                1,
                LOCALE_USER_DEFAULT,
                &mut id,
            )
        }
        .map_err(|_| DispatchError::MemberNotFound(member.to_string()))?;
        Ok(id)
    }

    fn call(
        &self,
        member: &str,
        flags: DISPATCH_FLAGS,
        args: &[Variant],
        value: Option<&Variant>,
    ) -> DispatchResult<Variant> {
        let id = self.dispid(member)?;

        // Positional arguments travel last to first; a put's value leads
        let mut raw = Vec::with_capacity(args.len() + 1);
        if let Some(value) = value {
            raw.push(to_variant(member, value)?);
        }
        for arg in args.iter().rev() {
            raw.push(to_variant(member, arg)?);
        }

        let mut named = DISPID_PROPERTYPUT;
        let params = DISPPARAMS {
            rgvarg: if raw.is_empty() {
                std::ptr::null_mut()
            } else {
                raw.as_mut_ptr()
            },
            rgdispidNamedArgs: if value.is_some() {
                &mut named
            } else {
                std::ptr::null_mut()
            },
            cArgs: raw.len() as u32,
            cNamedArgs: u32::from(value.is_some()),
        };

        let mut result = VARIANT::default();
        unsafe {
            self.dispatch.Invoke(
                id,
                &GUID::zeroed(),
                LOCALE_USER_DEFAULT,
                flags,
                &params,
                Some(&mut result as *mut _),
                None,
                None,
            )
        }
        .map_err(|e| DispatchError::raised(member, e.to_string()))?;

        from_variant(member, &result)
    }
}

impl Dispatch for ComObject {
    fn invoke(&self, member: &str, args: &[Variant]) -> DispatchResult<Variant> {
        self.call(member, DISPATCH_METHOD, args, None)
    }

    fn get(&self, property: &str, args: &[Variant]) -> DispatchResult<Variant> {
        // Indexed properties are often exposed as methods
        let flags = DISPATCH_FLAGS(DISPATCH_METHOD.0 | DISPATCH_PROPERTYGET.0);
        self.call(property, flags, args, None)
    }

    fn put(&self, property: &str, args: &[Variant], value: Variant) -> DispatchResult<()> {
        self.call(property, DISPATCH_PROPERTYPUT, args, Some(&value)).map(|_| ())
    }

    fn type_name(&self) -> &str {
        &self.type_name
    }
}

fn to_variant(member: &str, value: &Variant) -> DispatchResult<VARIANT> {
    Ok(match value {
        Variant::Empty => VARIANT::default(),
        Variant::Bool(b) => VARIANT::from(*b),
        Variant::Int(v) => match i32::try_from(*v) {
            Ok(v) => VARIANT::from(v),
            Err(_) => VARIANT::from(*v as f64),
        },
        Variant::Float(v) => VARIANT::from(*v),
        Variant::Text(s) => VARIANT::from(BSTR::from(s.as_str())),
        Variant::Array(_) => return Err(DispatchError::type_mismatch(member, "a scalar argument")),
        Variant::Object(_) => return Err(DispatchError::type_mismatch(member, "a value argument")),
    })
}

fn from_variant(member: &str, value: &VARIANT) -> DispatchResult<Variant> {
    if value.is_empty() {
        return Ok(Variant::Empty);
    }
    if let Ok(unknown) = IUnknown::try_from(value) {
        let dispatch: IDispatch = unknown
            .cast()
            .map_err(|_| DispatchError::type_mismatch(member, "an automation object"))?;
        return Ok(Variant::Object(Rc::new(ComObject::new(dispatch, member))));
    }
    if let Ok(v) = f64::try_from(value) {
        if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
            return Ok(Variant::Int(v as i64));
        }
        return Ok(Variant::Float(v));
    }
    if let Ok(text) = BSTR::try_from(value) {
        return Ok(Variant::Text(text.to_string()));
    }
    Ok(Variant::Empty)
}
