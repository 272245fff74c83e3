// Scan mode and discoverable timeout

use log::{info, warn};

use super::{Context, HandlerResult, Services};
use crate::error::AdapterError;
use crate::hci::{Command, READ_TIMEOUT, SHORT_TIMEOUT};
use crate::message::{string_arg, u32_arg, Value};
use crate::session::{AdapterHandle, ScanMode, SessionState};

pub fn get_mode(ctx: &mut Context<'_>, _args: &[Value]) -> HandlerResult {
    Ok(vec![ctx.state.scan_mode().as_str().into()])
}

/// Writes the scan-enable bits only when they differ from the cached value.
pub fn set_mode(ctx: &mut Context<'_>, args: &[Value]) -> HandlerResult {
    let label = string_arg(args, 0)?;
    let bits = ScanMode::parse(label)
        .and_then(ScanMode::scan_enable)
        .ok_or_else(|| AdapterError::invalid_parameter(format!("unknown mode '{label}'")))?;

    let mut session = ctx.open()?;
    if bits != ctx.state.scan_enable() {
        ctx.exec(session.as_mut(), &Command::WriteScanEnable(bits), SHORT_TIMEOUT)?;
        ctx.state.set_scan_enable(bits);
        info!("{} scan mode is now {}", ctx.adapter.name(), ctx.state.scan_mode().as_str());
    }
    Ok(Vec::new())
}

pub fn get_discoverable_timeout(ctx: &mut Context<'_>, _args: &[Value]) -> HandlerResult {
    Ok(vec![ctx.state.discoverable_timeout().into()])
}

pub fn set_discoverable_timeout(ctx: &mut Context<'_>, args: &[Value]) -> HandlerResult {
    ctx.state.set_discoverable_timeout(u32_arg(args, 0)?);
    Ok(Vec::new())
}

pub fn is_connectable(ctx: &mut Context<'_>, _args: &[Value]) -> HandlerResult {
    Ok(vec![ctx.state.is_connectable().into()])
}

pub fn is_discoverable(ctx: &mut Context<'_>, _args: &[Value]) -> HandlerResult {
    Ok(vec![ctx.state.is_discoverable().into()])
}

/// Seeds the scan-mode cache from the controller. On failure the cache keeps
/// its current value.
pub fn refresh_scan_mode(adapter: &AdapterHandle, state: &mut SessionState, services: &Services) {
    let reply = services
        .channel
        .open(adapter)
        .and_then(|mut session| session.send(&Command::ReadScanEnable, READ_TIMEOUT));

    match reply {
        Ok(reply) if reply.status == 0 => match reply.parameters.first() {
            Some(&bits) => {
                state.set_scan_enable(bits);
                info!("{} scan mode: {}", adapter.name(), state.scan_mode().as_str());
            }
            None => warn!("Empty scan enable reply from {}", adapter.name()),
        },
        Ok(reply) => warn!(
            "Reading scan enable on {} failed with status 0x{:02x}",
            adapter.name(),
            reply.status
        ),
        Err(e) => warn!("Can't read scan enable on {}: {e}", adapter.name()),
    }
}
