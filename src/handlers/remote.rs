// Stored facts about remote devices

use super::local::{revision_label, version_label};
use super::{Context, HandlerResult};
use crate::error::AdapterError;
use crate::events::AdapterEvent;
use crate::ident::company_name;
use crate::message::{address_arg, text_arg, Value};
use crate::store::Category;

/// Looks up the record stored for the address in argument 0.
fn record(ctx: &Context<'_>, args: &[Value], category: Category) -> Result<String, AdapterError> {
    let address = address_arg(args, 0)?;
    ctx.services
        .store
        .get(ctx.scope(category), &address.to_string())?
        .ok_or_else(|| {
            AdapterError::record_not_found(format!(
                "no {} entry for {address}",
                category.file_name()
            ))
        })
}

/// `field` of the `<compid> <lmp_ver> <lmp_subver>` manufacturer record.
fn manufacturer_field<T: std::str::FromStr>(
    ctx: &Context<'_>,
    args: &[Value],
    field: usize,
) -> Result<T, AdapterError> {
    let record = record(ctx, args, Category::Manufacturers)?;
    record
        .split_whitespace()
        .nth(field)
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| AdapterError::record_not_found(format!("incomplete record '{record}'")))
}

pub fn get_remote_version(ctx: &mut Context<'_>, args: &[Value]) -> HandlerResult {
    let lmp_version: u8 = manufacturer_field(ctx, args, 1)?;
    Ok(vec![version_label(lmp_version).into()])
}

pub fn get_remote_revision(ctx: &mut Context<'_>, args: &[Value]) -> HandlerResult {
    let subversion: u16 = manufacturer_field(ctx, args, 2)?;
    Ok(vec![revision_label(subversion).into()])
}

pub fn get_remote_manufacturer(ctx: &mut Context<'_>, args: &[Value]) -> HandlerResult {
    let company: u16 = manufacturer_field(ctx, args, 0)?;
    Ok(vec![company_name(company).into()])
}

pub fn get_remote_company(ctx: &mut Context<'_>, args: &[Value]) -> HandlerResult {
    let address = address_arg(args, 0)?;
    let company = ctx
        .services
        .oui
        .lookup(&address)
        .ok_or_else(|| AdapterError::record_not_found(format!("no OUI entry for {address}")))?;
    Ok(vec![company.into()])
}

pub fn get_remote_name(ctx: &mut Context<'_>, args: &[Value]) -> HandlerResult {
    Ok(vec![record(ctx, args, Category::Names)?.into()])
}

pub fn get_remote_alias(ctx: &mut Context<'_>, args: &[Value]) -> HandlerResult {
    Ok(vec![record(ctx, args, Category::Aliases)?.into()])
}

pub fn set_remote_alias(ctx: &mut Context<'_>, args: &[Value]) -> HandlerResult {
    let address = address_arg(args, 0)?;
    let alias = text_arg(args, 1)?;
    if alias.is_empty() {
        return Err(AdapterError::invalid_parameter("alias is empty"));
    }

    ctx.services
        .store
        .set(ctx.scope(Category::Aliases), &address.to_string(), alias)?;
    ctx.emit(AdapterEvent::RemoteAliasChanged {
        address: address.to_string(),
        alias: alias.to_string(),
    });
    Ok(Vec::new())
}

pub fn last_seen(ctx: &mut Context<'_>, args: &[Value]) -> HandlerResult {
    Ok(vec![record(ctx, args, Category::LastSeen)?.into()])
}

pub fn last_used(ctx: &mut Context<'_>, args: &[Value]) -> HandlerResult {
    Ok(vec![record(ctx, args, Category::LastUsed)?.into()])
}
