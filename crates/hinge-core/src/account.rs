use serde::{Deserialize, Serialize};

/// One address exposed by a wallet for a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Balance snapshot in the chain's smallest unit, as reported at connect time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation_path: Option<String>,
    pub index: u32,
    pub is_default: bool,
    pub is_active: bool,
}

impl Account {
    pub fn new(address: impl Into<String>, index: u32) -> Self {
        Self {
            address: address.into(),
            label: None,
            balance: None,
            derivation_path: None,
            index,
            is_default: false,
            is_active: false,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Build an account list from plain addresses, marking the first one
    /// default and active.
    pub fn from_addresses<I, S>(addresses: I) -> Vec<Account>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        addresses
            .into_iter()
            .enumerate()
            .map(|(i, addr)| {
                let mut account = Account::new(addr, i as u32);
                if i == 0 {
                    account.is_default = true;
                    account.is_active = true;
                }
                account
            })
            .collect()
    }
}

/// Address comparison used by account lookups. EVM addresses are hex and
/// case-insensitive; other families compare exactly.
pub fn same_address(a: &str, b: &str) -> bool {
    if a.starts_with("0x") && b.starts_with("0x") {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}
