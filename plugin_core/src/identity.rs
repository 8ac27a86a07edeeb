//! Maps an account name to its numeric user id.

use std::ffi::CString;

use crate::error::IdentityError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub name: String,
    pub uid: u32,
}

pub trait IdentityResolver: Send + Sync {
    /// `Ok(None)` when no such account exists.
    fn resolve(&self, username: &str) -> Result<Option<UserIdentity>, IdentityError>;
}

/// Looks accounts up in the system user database.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemIdentityResolver;

const INITIAL_BUFFER: usize = 1024;
const MAX_BUFFER: usize = 1 << 20;

impl IdentityResolver for SystemIdentityResolver {
    fn resolve(&self, username: &str) -> Result<Option<UserIdentity>, IdentityError> {
        let name = CString::new(username).map_err(|_| IdentityError::InvalidName)?;
        let mut buffer: Vec<libc::c_char> = vec![0; INITIAL_BUFFER];

        loop {
            let mut entry: libc::passwd = unsafe { std::mem::zeroed() };
            let mut result: *mut libc::passwd = std::ptr::null_mut();
            let rc = unsafe {
                libc::getpwnam_r(
                    name.as_ptr(),
                    &mut entry,
                    buffer.as_mut_ptr(),
                    buffer.len(),
                    &mut result,
                )
            };

            if rc == libc::ERANGE && buffer.len() < MAX_BUFFER {
                buffer.resize(buffer.len() * 2, 0);
                continue;
            }
            if rc != 0 {
                return Err(IdentityError::Lookup(rc));
            }
            if result.is_null() {
                return Ok(None);
            }
            return Ok(Some(UserIdentity {
                name: username.to_string(),
                uid: entry.pw_uid as u32,
            }));
        }
    }
}
