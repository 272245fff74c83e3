// Bondings: stored link keys and the connections that use them

use log::{info, warn};

use super::{malformed, Context, HandlerResult};
use crate::error::AdapterError;
use crate::events::AdapterEvent;
use crate::hci::{
    Command, LinkType, READ_TIMEOUT, REASON_USER_ENDED, SHORT_TIMEOUT,
};
use crate::message::{address_arg, Value};
use crate::store::{Category, EntryVisitor};

/// Collects link-key addresses. Allocation failure is remembered and ends
/// the collection.
#[derive(Debug, Default)]
struct KeyCollector {
    keys: Vec<String>,
    exhausted: bool,
}

impl EntryVisitor for KeyCollector {
    fn visit(&mut self, key: &str, _value: &str) {
        if self.exhausted {
            return;
        }
        if self.keys.try_reserve(1).is_err() {
            self.exhausted = true;
            return;
        }
        self.keys.push(key.to_string());
    }
}

/// Requests authentication on the ACL link to the peer. The link must be
/// held by this adapter.
pub fn create_bonding(ctx: &mut Context<'_>, args: &[Value]) -> HandlerResult {
    let peer = address_arg(args, 0)?;

    let owner = ctx.services.channel.locate_connection(&peer, LinkType::Acl)?;
    if owner != Some(ctx.adapter.index()) {
        return Err(AdapterError::connection_not_found(peer));
    }

    let mut session = ctx.open()?;
    let connection = session
        .connection_info(&peer, LinkType::Acl)?
        .ok_or_else(|| AdapterError::connection_not_found(peer))?;

    ctx.exec(
        session.as_mut(),
        &Command::AuthenticationRequested {
            handle: connection.handle,
        },
        SHORT_TIMEOUT,
    )?;
    info!("Authentication requested for {peer} on {}", ctx.adapter.name());
    Ok(Vec::new())
}

/// Forgets the link key and drops any live ACL link to the peer. Succeeds
/// when there was nothing to remove.
pub fn remove_bonding(ctx: &mut Context<'_>, args: &[Value]) -> HandlerResult {
    let peer = address_arg(args, 0)?;
    let mut session = ctx.open()?;

    ctx.services
        .store
        .delete(ctx.scope(Category::LinkKeys), &peer.to_string())?;

    if let Err(e) = ctx.exec(
        session.as_mut(),
        &Command::DeleteStoredLinkKey { peer },
        READ_TIMEOUT,
    ) {
        warn!("Can't delete the controller's link key for {peer}: {e}");
    }

    if let Some(connection) = session.connection_info(&peer, LinkType::Acl)? {
        session
            .disconnect(connection.handle, REASON_USER_ENDED, READ_TIMEOUT)
            .map_err(|e| {
                warn!("Disconnecting {peer} failed: {e}");
                AdapterError::from(e)
            })?;
    }

    ctx.emit(AdapterEvent::BondingRemoved {
        address: peer.to_string(),
    });
    Ok(Vec::new())
}

pub fn has_bonding(ctx: &mut Context<'_>, args: &[Value]) -> HandlerResult {
    let Ok(peer) = address_arg(args, 0) else {
        return Ok(vec![false.into()]);
    };
    let bonded = match ctx
        .services
        .store
        .get(ctx.scope(Category::LinkKeys), &peer.to_string())
    {
        Ok(key) => key.is_some(),
        Err(e) => {
            warn!("Can't read link key for {peer}: {e}");
            false
        }
    };
    Ok(vec![bonded.into()])
}

pub fn list_bondings(ctx: &mut Context<'_>, _args: &[Value]) -> HandlerResult {
    let mut collector = KeyCollector::default();
    ctx.services
        .store
        .for_each(ctx.scope(Category::LinkKeys), &mut collector)?;
    if collector.exhausted {
        return Err(AdapterError::OutOfMemory);
    }
    Ok(vec![Value::StringArray(collector.keys)])
}

/// Third field of the `<key> <type> <pin length>` link-key record.
pub fn get_pin_code_length(ctx: &mut Context<'_>, args: &[Value]) -> HandlerResult {
    let peer = address_arg(args, 0)?;
    let record = ctx
        .services
        .store
        .get(ctx.scope(Category::LinkKeys), &peer.to_string())?
        .ok_or_else(|| AdapterError::record_not_found(format!("no link key for {peer}")))?;

    let length: u8 = record
        .split_whitespace()
        .nth(2)
        .and_then(|field| field.parse().ok())
        .ok_or_else(|| AdapterError::record_not_found(format!("no pin length for {peer}")))?;
    Ok(vec![length.into()])
}

pub fn get_encryption_key_size(ctx: &mut Context<'_>, args: &[Value]) -> HandlerResult {
    let peer = address_arg(args, 0)?;
    let mut session = ctx.open()?;
    let connection = session
        .connection_info(&peer, LinkType::Acl)?
        .ok_or_else(|| AdapterError::connection_not_found(peer))?;

    let command = Command::ReadEncryptionKeySize {
        handle: connection.handle,
    };
    let params = ctx.exec(session.as_mut(), &command, READ_TIMEOUT)?;
    let size = *params
        .get(2)
        .ok_or_else(|| malformed(&command, params.len()))?;
    Ok(vec![size.into()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{Fixture, PEER};
    use crate::hci::{opcode, ConnectionInfo, OCF_AUTH_REQUESTED, OCF_DISCONNECT, OGF_LINK_CTL};
    use crate::store::AttributeStore;

    const AUTH_REQUESTED: u16 = opcode(OGF_LINK_CTL, OCF_AUTH_REQUESTED);
    const DISCONNECT: u16 = opcode(OGF_LINK_CTL, OCF_DISCONNECT);

    fn store_key(fixture: &Fixture, address: &str, value: &str) {
        fixture
            .store
            .set(fixture.scope(Category::LinkKeys), address, value)
            .expect("store");
    }

    #[test]
    fn remove_bonding_without_key_or_link_succeeds() {
        let mut fixture = Fixture::new();
        let args = [Value::from(PEER)];

        assert_eq!(fixture.call("a", remove_bonding, &args), Ok(Vec::new()));
        assert_eq!(fixture.call("a", remove_bonding, &args), Ok(Vec::new()));
        assert!(fixture.sent(DISCONNECT).is_empty());
    }

    #[test]
    fn remove_bonding_drops_key_and_link() {
        let mut fixture = Fixture::new();
        store_key(&fixture, PEER, "0123456789ABCDEF0123456789ABCDEF 0 4");
        fixture.controller.add_connection(0, Fixture::peer(), 0x002a);
        let args = [Value::from(PEER)];

        fixture
            .call("a", remove_bonding, &args)
            .expect("remove bonding");

        assert_eq!(
            fixture.call("a", has_bonding, &args),
            Ok(vec![Value::Boolean(false)])
        );
        assert_eq!(
            fixture.sent(DISCONNECT),
            vec![Command::Disconnect {
                handle: 0x002a,
                reason: REASON_USER_ENDED
            }]
        );
        assert_eq!(
            fixture.events.events(),
            vec![(
                0,
                AdapterEvent::BondingRemoved {
                    address: PEER.into()
                }
            )]
        );
    }

    #[test]
    fn failed_disconnect_fails_removal_but_keeps_key_deleted() {
        let mut fixture = Fixture::new();
        store_key(&fixture, PEER, "00 0 4");
        fixture.controller.add_connection(0, Fixture::peer(), 0x002a);
        fixture.controller.reject(0, DISCONNECT, 0x0c);
        let args = [Value::from(PEER)];

        let result = fixture.call("a", remove_bonding, &args);
        assert_eq!(result, Err(AdapterError::status(0x0c)));
        assert_eq!(
            fixture.call("a", has_bonding, &args),
            Ok(vec![Value::Boolean(false)])
        );
        assert!(fixture.events.events().is_empty());
    }

    #[test]
    fn create_bonding_needs_a_link_on_this_adapter() {
        let mut fixture = Fixture::new();
        let args = [Value::from(PEER)];

        let result = fixture.call("a", create_bonding, &args);
        assert!(matches!(
            result,
            Err(AdapterError::ConnectionNotFound { .. })
        ));

        let other = crate::session::AdapterHandle::new(1, "00:1A:7D:DA:71:14".parse().expect("address"));
        fixture.controller.add_adapter(&other);
        fixture.controller.add_connection(1, Fixture::peer(), 0x0010);
        let result = fixture.call("a", create_bonding, &args);
        assert!(matches!(
            result,
            Err(AdapterError::ConnectionNotFound { .. })
        ));
        assert!(fixture.sent(AUTH_REQUESTED).is_empty());
    }

    #[test]
    fn create_bonding_requests_authentication() {
        let mut fixture = Fixture::new();
        fixture.controller.add_connection(0, Fixture::peer(), 0x002a);

        fixture
            .call("a", create_bonding, &[Value::from(PEER)])
            .expect("create bonding");
        assert_eq!(
            fixture.sent(AUTH_REQUESTED),
            vec![Command::AuthenticationRequested { handle: 0x002a }]
        );
    }

    #[test]
    fn list_and_has_bondings() {
        let mut fixture = Fixture::new();
        store_key(&fixture, "00:0A:95:9D:68:20", "AA 0 6");
        store_key(&fixture, PEER, "BB 0 4");

        assert_eq!(
            fixture.call("a", list_bondings, &[]),
            Ok(vec![Value::StringArray(vec![
                PEER.into(),
                "00:0A:95:9D:68:20".into()
            ])])
        );
        assert_eq!(
            fixture.call("a", has_bonding, &[Value::from(PEER)]),
            Ok(vec![Value::Boolean(true)])
        );
        assert_eq!(
            fixture.call("a", has_bonding, &[Value::from("garbage")]),
            Ok(vec![Value::Boolean(false)])
        );
    }

    #[test]
    fn pin_code_length_is_the_third_field() {
        let mut fixture = Fixture::new();
        let args = [Value::from(PEER)];
        assert!(matches!(
            fixture.call("a", get_pin_code_length, &args),
            Err(AdapterError::RecordNotFound { .. })
        ));

        store_key(&fixture, PEER, "0123456789ABCDEF 0 4");
        assert_eq!(
            fixture.call("a", get_pin_code_length, &args),
            Ok(vec![Value::Byte(4)])
        );
    }

    #[test]
    fn encryption_key_size_reads_the_link() {
        let mut fixture = Fixture::new();
        let args = [Value::from(PEER)];
        assert!(matches!(
            fixture.call("a", get_encryption_key_size, &args),
            Err(AdapterError::ConnectionNotFound { .. })
        ));

        fixture.controller.with_state(0, |state| {
            state.encryption_key_size = 7;
            state.connections.push(ConnectionInfo {
                handle: 0x0040,
                peer: Fixture::peer(),
                link_type: LinkType::Acl,
            });
        });
        assert_eq!(
            fixture.call("a", get_encryption_key_size, &args),
            Ok(vec![Value::Byte(7)])
        );
    }

    #[test]
    fn collector_reports_exhaustion() {
        let mut collector = KeyCollector::default();
        collector.visit("a", "1");
        collector.exhausted = true;
        collector.visit("b", "2");
        assert_eq!(collector.keys, vec!["a".to_string()]);
    }
}
