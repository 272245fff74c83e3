// Device discovery (inquiry) and its ownership

use log::info;

use super::{Context, HandlerResult, Services};
use crate::error::AdapterError;
use crate::events::AdapterEvent;
use crate::hci::{Command, GIAC_LAP, INQUIRY_LENGTH, SHORT_TIMEOUT};
use crate::message::Value;
use crate::session::{AdapterHandle, SessionState};

/// Starts a general inquiry owned by the caller.
pub fn discover_devices(ctx: &mut Context<'_>, _args: &[Value]) -> HandlerResult {
    ctx.state.discovery().ensure_idle()?;

    let mut session = ctx.open()?;
    ctx.exec(
        session.as_mut(),
        &Command::Inquiry {
            lap: GIAC_LAP,
            length: INQUIRY_LENGTH,
            num_responses: 0,
        },
        SHORT_TIMEOUT,
    )?;

    ctx.state.discovery_mut().begin(ctx.caller);
    info!("{} started discovery on {}", ctx.caller, ctx.adapter.name());
    Ok(Vec::new())
}

/// Only the owner of the running inquiry may cancel it.
pub fn cancel_discovery(ctx: &mut Context<'_>, _args: &[Value]) -> HandlerResult {
    ctx.state.discovery().authorize_cancel(ctx.caller)?;

    let mut session = ctx.open()?;
    ctx.exec(session.as_mut(), &Command::InquiryCancel, SHORT_TIMEOUT)?;

    ctx.state.discovery_mut().finish();
    info!("{} cancelled discovery on {}", ctx.caller, ctx.adapter.name());
    Ok(Vec::new())
}

pub fn discover_cache(_ctx: &mut Context<'_>, _args: &[Value]) -> HandlerResult {
    Err(AdapterError::not_implemented("DiscoverCache"))
}

pub fn discover_service(_ctx: &mut Context<'_>, _args: &[Value]) -> HandlerResult {
    Err(AdapterError::not_implemented("DiscoverService"))
}

/// The controller reported the end of an inquiry. Releases ownership and
/// tells the former owner.
pub fn inquiry_complete(adapter: &AdapterHandle, state: &mut SessionState, services: &Services) {
    if let Some(owner) = state.discovery_mut().finish() {
        info!("Discovery by {owner} on {} completed", adapter.name());
        services
            .events
            .emit(adapter, AdapterEvent::DiscoveryCompleted { owner });
    }
}
