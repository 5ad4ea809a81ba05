use crate::error::{Error, ErrorKind, Result};

pub const SSH_CONNECTION_VAR: &str = "SSH_CONNECTION";
pub const SSH_CLIENT_PLACEHOLDER: &str = "<SSHClient>";

/// Extracts the client address from an `SSH_CONNECTION` descriptor
/// (`<src-ip> <src-port> <dst-ip> <dst-port>`).
pub fn client_ip_from(descriptor: Option<&str>) -> Result<String> {
    let Some(raw) = descriptor.map(str::trim).filter(|s| !s.is_empty()) else {
        return Err(Error::new(
            ErrorKind::AddressResolution,
            format!("{SSH_CONNECTION_VAR} is not set; is this an SSH session?"),
        ));
    };
    let fields: Vec<&str> = raw.split_whitespace().collect();
    if fields.len() != 4 {
        return Err(Error::new(
            ErrorKind::AddressResolution,
            format!(
                "{SSH_CONNECTION_VAR} should have 4 fields, got {}: '{raw}'",
                fields.len()
            ),
        ));
    }
    Ok(fields[0].to_string())
}

/// Replaces the client placeholder in `pattern`. The descriptor is only
/// consulted when the placeholder is present.
pub fn expand_ip<F>(pattern: &str, descriptor: F) -> Result<String>
where
    F: FnOnce() -> Option<String>,
{
    if !pattern.contains(SSH_CLIENT_PLACEHOLDER) {
        return Ok(pattern.trim().to_string());
    }
    let ip = client_ip_from(descriptor().as_deref())?;
    Ok(pattern.replace(SSH_CLIENT_PLACEHOLDER, &ip).trim().to_string())
}
