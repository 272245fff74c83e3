// Identity tables: company identifiers, LMP versions and the IEEE OUI registry

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use bluer::Address;
use log::info;

const COMPANIES: [&str; 64] = [
    "Ericsson Technology Licensing",
    "Nokia Mobile Phones",
    "Intel Corp.",
    "IBM Corp.",
    "Toshiba Corp.",
    "3Com",
    "Microsoft",
    "Lucent",
    "Motorola",
    "Infineon Technologies AG",
    "Cambridge Silicon Radio",
    "Silicon Wave",
    "Digianswer A/S",
    "Texas Instruments Inc.",
    "Parthus Technologies Inc.",
    "Broadcom Corporation",
    "Mitel Semiconductor",
    "Widcomm, Inc.",
    "Zeevo, Inc.",
    "Atmel Corporation",
    "Mitsubishi Electric Corporation",
    "RTX Telecom A/S",
    "KC Technology Inc.",
    "Newlogic",
    "Transilica, Inc.",
    "Rohde & Schwarz GmbH & Co. KG",
    "TTPCom Limited",
    "Signia Technologies, Inc.",
    "Conexant Systems Inc.",
    "Qualcomm",
    "Inventel",
    "AVM Berlin",
    "BandSpeed, Inc.",
    "Mansella Ltd",
    "NEC Corporation",
    "WavePlus Technology Co., Ltd.",
    "Alcatel",
    "Philips Semiconductors",
    "C Technologies",
    "Open Interface",
    "R F Micro Devices",
    "Hitachi Ltd",
    "Symbol Technologies, Inc.",
    "Tenovis",
    "Macronix International Co. Ltd.",
    "GCT Semiconductor",
    "Norwood Systems",
    "MewTel Technology Inc.",
    "ST Microelectronics",
    "Synopsys",
    "Red-M (Communications) Ltd",
    "Commil Ltd",
    "Computer Access Technology Corporation (CATC)",
    "Eclipse (HQ Espana) S.L.",
    "Renesas Technology Corp.",
    "Mobilian Corporation",
    "Terax",
    "Integrated System Solution Corp.",
    "Matsushita Electric Industrial Co., Ltd.",
    "Gennum Corporation",
    "Research In Motion",
    "IPextreme, Inc.",
    "Systems and Chips, Inc",
    "Bluetooth SIG, Inc",
];

const LMP_VERSIONS: [&str; 14] = [
    "1.0b", "1.1", "1.2", "2.0", "2.1", "3.0", "4.0", "4.1", "4.2", "5.0", "5.1", "5.2", "5.3",
    "5.4",
];

pub fn company_name(id: u16) -> &'static str {
    match id {
        0xffff => "internal use",
        id => COMPANIES
            .get(usize::from(id))
            .copied()
            .unwrap_or("not assigned"),
    }
}

pub fn lmp_version_label(version: u8) -> &'static str {
    LMP_VERSIONS
        .get(usize::from(version))
        .copied()
        .unwrap_or("unknown")
}

/// Organisation names keyed by `XX:XX:XX` prefix.
#[derive(Debug, Clone, Default)]
pub struct OuiDatabase {
    entries: HashMap<String, String>,
}

impl OuiDatabase {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let database = Self::parse(&fs::read_to_string(path)?);
        info!(
            "Loaded {} OUI entries from {}",
            database.entries.len(),
            path.display()
        );
        Ok(database)
    }

    /// Accepts both `00-0A-95   (hex)` and `000A95     (base 16)` lines of
    /// the IEEE registry dump.
    pub fn parse(content: &str) -> Self {
        let mut entries = HashMap::new();
        for line in content.lines() {
            let parsed = line
                .split_once("(hex)")
                .and_then(|(prefix, name)| Some((hex_prefix(prefix)?, name)))
                .or_else(|| {
                    line.split_once("(base 16)")
                        .and_then(|(prefix, name)| Some((base16_prefix(prefix)?, name)))
                });
            if let Some((oui, name)) = parsed {
                let name = name.trim();
                if !name.is_empty() {
                    entries.entry(oui).or_insert_with(|| name.to_string());
                }
            }
        }
        Self { entries }
    }

    pub fn lookup(&self, address: &Address) -> Option<&str> {
        self.entries.get(&oui_of(address)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn oui_of(address: &Address) -> String {
    let [a, b, c, ..] = address.0;
    format!("{a:02X}:{b:02X}:{c:02X}")
}

fn hex_prefix(prefix: &str) -> Option<String> {
    let digits = prefix.trim().replace('-', "");
    base16_prefix(&digits)
}

fn base16_prefix(prefix: &str) -> Option<String> {
    let digits = prefix.trim();
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let digits = digits.to_ascii_uppercase();
    Some(format!("{}:{}:{}", &digits[0..2], &digits[2..4], &digits[4..6]))
}
