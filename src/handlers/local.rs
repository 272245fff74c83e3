// Identity, class and name of the local adapter

use log::info;

use super::{malformed, Context, HandlerResult};
use crate::class::{
    decode_minor_class, decode_service_classes, encode_minor_class, minor_class_index,
    MAJOR_COMPUTER, MAJOR_COMPUTER_LABEL,
};
use crate::error::AdapterError;
use crate::events::AdapterEvent;
use crate::hci::{Command, NAME_LENGTH, READ_TIMEOUT, WRITE_TIMEOUT};
use crate::ident::{company_name, lmp_version_label};
use crate::message::{string_arg, text_arg, Value};
use crate::store::Category;

/// Fields of the Read Local Version Information reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVersion {
    pub hci_version: u8,
    pub hci_revision: u16,
    pub lmp_version: u8,
    pub manufacturer: u16,
    pub lmp_subversion: u16,
}

impl LocalVersion {
    fn parse(params: &[u8]) -> Option<Self> {
        match *params {
            [hci_version, rev0, rev1, lmp_version, man0, man1, sub0, sub1, ..] => Some(Self {
                hci_version,
                hci_revision: u16::from_le_bytes([rev0, rev1]),
                lmp_version,
                manufacturer: u16::from_le_bytes([man0, man1]),
                lmp_subversion: u16::from_le_bytes([sub0, sub1]),
            }),
            _ => None,
        }
    }
}

pub fn version_label(lmp_version: u8) -> String {
    format!("Bluetooth {}", lmp_version_label(lmp_version))
}

pub fn revision_label(revision: u16) -> String {
    format!("HCI 0x{revision:x}")
}

fn read_version(ctx: &Context<'_>) -> Result<LocalVersion, AdapterError> {
    let mut session = ctx.open()?;
    let params = ctx.exec(session.as_mut(), &Command::ReadLocalVersion, READ_TIMEOUT)?;
    LocalVersion::parse(&params).ok_or_else(|| malformed(&Command::ReadLocalVersion, params.len()))
}

pub fn get_address(ctx: &mut Context<'_>, _args: &[Value]) -> HandlerResult {
    Ok(vec![ctx.adapter.address().to_string().into()])
}

pub fn get_version(ctx: &mut Context<'_>, _args: &[Value]) -> HandlerResult {
    let version = read_version(ctx)?;
    Ok(vec![version_label(version.lmp_version).into()])
}

pub fn get_revision(ctx: &mut Context<'_>, _args: &[Value]) -> HandlerResult {
    let version = read_version(ctx)?;
    Ok(vec![revision_label(version.hci_revision).into()])
}

pub fn get_manufacturer(ctx: &mut Context<'_>, _args: &[Value]) -> HandlerResult {
    let version = read_version(ctx)?;
    Ok(vec![company_name(version.manufacturer).into()])
}

pub fn get_company(ctx: &mut Context<'_>, _args: &[Value]) -> HandlerResult {
    let address = ctx.adapter.address();
    let company = ctx
        .services
        .oui
        .lookup(&address)
        .ok_or_else(|| AdapterError::record_not_found(format!("no OUI entry for {address}")))?;
    Ok(vec![company.into()])
}

pub fn get_features(_ctx: &mut Context<'_>, _args: &[Value]) -> HandlerResult {
    Ok(vec![Value::StringArray(Vec::new())])
}

pub fn get_major_class(ctx: &mut Context<'_>, _args: &[Value]) -> HandlerResult {
    let mut session = ctx.open()?;
    let class = ctx.read_class(session.as_mut())?;
    let label = if class.major() == MAJOR_COMPUTER {
        MAJOR_COMPUTER_LABEL
    } else {
        ""
    };
    Ok(vec![label.into()])
}

/// Empty when the class is not a known computer minor class.
pub fn get_minor_class(ctx: &mut Context<'_>, _args: &[Value]) -> HandlerResult {
    let mut session = ctx.open()?;
    let class = ctx.read_class(session.as_mut())?;
    let minor = decode_minor_class(class).map_or("", |(_, minor)| minor);
    Ok(vec![minor.into()])
}

/// The merged class is stored before it is written to the controller, so a
/// failed write leaves the stored value in place.
pub fn set_minor_class(ctx: &mut Context<'_>, args: &[Value]) -> HandlerResult {
    let label = string_arg(args, 0)?;
    if minor_class_index(label).is_none() {
        return Err(AdapterError::invalid_parameter(format!(
            "'{label}' is not a computer minor class"
        )));
    }

    let mut session = ctx.open()?;
    let current = ctx.read_class(session.as_mut())?;
    let class = encode_minor_class(label, current)
        .map_err(|e| AdapterError::invalid_parameter(e.to_string()))?;

    ctx.services
        .store
        .set(ctx.scope(Category::Config), "class", &class.to_string())?;
    ctx.exec(
        session.as_mut(),
        &Command::WriteClassOfDevice(class),
        WRITE_TIMEOUT,
    )?;

    info!("{} class is now {class}", ctx.adapter.name());
    ctx.emit(AdapterEvent::MinorClassChanged {
        minor_class: label.to_string(),
    });
    Ok(Vec::new())
}

pub fn get_service_classes(ctx: &mut Context<'_>, _args: &[Value]) -> HandlerResult {
    let mut session = ctx.open()?;
    let class = ctx.read_class(session.as_mut())?;
    let services = decode_service_classes(class)
        .into_iter()
        .map(str::to_string)
        .collect();
    Ok(vec![Value::StringArray(services)])
}

pub fn get_name(ctx: &mut Context<'_>, _args: &[Value]) -> HandlerResult {
    let mut session = ctx.open()?;
    let params = ctx.exec(session.as_mut(), &Command::ReadLocalName, READ_TIMEOUT)?;
    let end = params.iter().position(|&b| b == 0).unwrap_or(params.len());
    Ok(vec![String::from_utf8_lossy(&params[..end]).into_owned().into()])
}

/// Persists the name, then writes it to the controller.
pub fn set_name(ctx: &mut Context<'_>, args: &[Value]) -> HandlerResult {
    let name = text_arg(args, 0)?;
    if name.is_empty() {
        return Err(AdapterError::invalid_parameter("name is empty"));
    }
    if name.len() > NAME_LENGTH {
        return Err(AdapterError::invalid_parameter(format!(
            "name is longer than {NAME_LENGTH} bytes"
        )));
    }

    ctx.services
        .store
        .set(ctx.scope(Category::Config), "name", name)?;

    let mut session = ctx.open()?;
    ctx.exec(
        session.as_mut(),
        &Command::WriteLocalName(name.to_string()),
        WRITE_TIMEOUT,
    )?;
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::DeviceClass;
    use crate::handlers::testing::Fixture;
    use crate::hci::{opcode, OCF_WRITE_CLASS_OF_DEV, OCF_WRITE_LOCAL_NAME, OGF_HOST_CTL};
    use crate::store::AttributeStore;

    const WRITE_CLASS: u16 = opcode(OGF_HOST_CTL, OCF_WRITE_CLASS_OF_DEV);
    const WRITE_LOCAL_NAME: u16 = opcode(OGF_HOST_CTL, OCF_WRITE_LOCAL_NAME);

    fn set_class(fixture: &Fixture, raw: u32) {
        fixture
            .controller
            .with_state(0, |state| state.class = DeviceClass::new(raw));
    }

    fn stored_class(fixture: &Fixture) -> Option<String> {
        fixture
            .store
            .get(fixture.scope(Category::Config), "class")
            .expect("store")
    }

    #[test]
    fn set_minor_class_keeps_service_bits() {
        let mut fixture = Fixture::new();
        set_class(&fixture, 0b101 << 13 | 0x0100 | 1 << 2);

        fixture
            .call("a", set_minor_class, &[Value::from("server")])
            .expect("set minor class");

        let expected = DeviceClass::new(0b101 << 13 | 0x0100 | 2 << 2);
        assert_eq!(stored_class(&fixture), Some(expected.to_string()));
        assert_eq!(
            fixture.sent(WRITE_CLASS),
            vec![Command::WriteClassOfDevice(expected)]
        );
        assert_eq!(
            fixture.events.events(),
            vec![(
                0,
                AdapterEvent::MinorClassChanged {
                    minor_class: "server".into()
                }
            )]
        );
    }

    #[test]
    fn failed_class_write_leaves_stored_intent() {
        let mut fixture = Fixture::new();
        fixture.controller.reject(0, WRITE_CLASS, 0x0c);

        let result = fixture.call("a", set_minor_class, &[Value::from("laptop")]);
        assert_eq!(result, Err(AdapterError::status(0x0c)));
        assert!(stored_class(&fixture).is_some());
        assert!(fixture.events.events().is_empty());
    }

    #[test]
    fn set_minor_class_rejects_unknown_labels_before_touching_hardware() {
        let mut fixture = Fixture::new();
        let result = fixture.call("a", set_minor_class, &[Value::from("toaster")]);
        assert!(matches!(result, Err(AdapterError::InvalidParameter { .. })));
        assert!(fixture.controller.sent(0).is_empty());
    }

    #[test]
    fn minor_class_is_empty_when_undecodable() {
        let mut fixture = Fixture::new();
        set_class(&fixture, 0x0100 | 7 << 2);
        assert_eq!(
            fixture.call("a", get_minor_class, &[]),
            Ok(vec![Value::from("")])
        );

        set_class(&fixture, 0x0200 | 1 << 2);
        assert_eq!(
            fixture.call("a", get_minor_class, &[]),
            Ok(vec![Value::from("")])
        );
        assert_eq!(
            fixture.call("a", get_major_class, &[]),
            Ok(vec![Value::from("")])
        );

        set_class(&fixture, 0x0100 | 3 << 2);
        assert_eq!(
            fixture.call("a", get_minor_class, &[]),
            Ok(vec![Value::from("laptop")])
        );
        assert_eq!(
            fixture.call("a", get_major_class, &[]),
            Ok(vec![Value::from("computer")])
        );
    }

    #[test]
    fn service_classes_come_from_the_controller() {
        let mut fixture = Fixture::new();
        set_class(&fixture, 0b0010_0010 << 16 | 0x0100);
        assert_eq!(
            fixture.call("a", get_service_classes, &[]),
            Ok(vec![Value::StringArray(vec![
                "networking".into(),
                "audio".into()
            ])])
        );
    }

    #[test]
    fn version_revision_and_manufacturer() {
        let mut fixture = Fixture::new();
        assert_eq!(
            fixture.call("a", get_version, &[]),
            Ok(vec![Value::from("Bluetooth 2.0")])
        );
        assert_eq!(
            fixture.call("a", get_revision, &[]),
            Ok(vec![Value::from("HCI 0xc5c")])
        );
        assert_eq!(
            fixture.call("a", get_manufacturer, &[]),
            Ok(vec![Value::from("Cambridge Silicon Radio")])
        );
    }

    #[test]
    fn address_and_company() {
        let mut fixture = Fixture::new();
        assert_eq!(
            fixture.call("a", get_address, &[]),
            Ok(vec![Value::from("00:1A:7D:DA:71:13")])
        );
        assert_eq!(
            fixture.call("a", get_company, &[]),
            Ok(vec![Value::from("cyber-blue(HK)Ltd")])
        );
        assert_eq!(
            fixture.call("a", get_features, &[]),
            Ok(vec![Value::StringArray(Vec::new())])
        );
    }

    #[test]
    fn name_round_trips_through_the_controller() {
        let mut fixture = Fixture::new();
        fixture
            .call("a", set_name, &[Value::from("desk")])
            .expect("set name");
        assert_eq!(
            fixture.call("a", get_name, &[]),
            Ok(vec![Value::from("desk")])
        );

        let result = fixture.call("a", set_name, &[Value::from("")]);
        assert!(matches!(result, Err(AdapterError::InvalidParameter { .. })));
        let long = "x".repeat(NAME_LENGTH + 1);
        let result = fixture.call("a", set_name, &[Value::from(long)]);
        assert!(matches!(result, Err(AdapterError::InvalidParameter { .. })));
    }

    #[test]
    fn names_with_line_breaks_are_refused() {
        let mut fixture = Fixture::new();
        fixture
            .store
            .set(fixture.scope(Category::Config), "class", "0x000100")
            .expect("store");

        let result = fixture.call("a", set_name, &[Value::from("desk\nclass 0xffffff")]);
        assert!(matches!(result, Err(AdapterError::InvalidParameter { .. })));
        assert_eq!(
            fixture
                .store
                .get(fixture.scope(Category::Config), "class")
                .expect("get")
                .as_deref(),
            Some("0x000100")
        );
        assert_eq!(
            fixture
                .store
                .get(fixture.scope(Category::Config), "name")
                .expect("get"),
            None
        );
        assert!(fixture.sent(WRITE_LOCAL_NAME).is_empty());
    }

    #[test]
    fn version_parse_needs_eight_bytes() {
        assert_eq!(LocalVersion::parse(&[3, 0x5c, 0x0c, 3, 10, 0]), None);
        let version = LocalVersion::parse(&[3, 0x5c, 0x0c, 3, 10, 0, 0x5c, 0x0c]).expect("parse");
        assert_eq!(version.manufacturer, 10);
        assert_eq!(version.hci_revision, 0x0c5c);
    }
}
