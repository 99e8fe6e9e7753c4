//! Transactions: the text commands read from input and the payload that
//! travels through the group.
//!
//! ## Commands
//!
//! ```text
//! DEPOSIT <account> <amount>
//! TRANSFER <from> TO <to> <amount>
//! ```
//!
//! ## Payload
//!
//! A polymorphic JSON object whose `body` is itself a JSON document,
//! encoded as a string:
//!
//! ```text
//! {"type":"deposit","body":"{\"account\":\"a\",\"amount\":10}"}
//! ```

use {
    crate::error::{BankError, Result},
    serde::{Deserialize, Serialize},
    std::{fmt, str::FromStr},
};

pub const DEPOSIT_PATH: &str = "/transaction/deposit";
pub const TRANSFER_PATH: &str = "/transaction/transfer";

pub const DEPOSIT_TYPE_ID: &str = "deposit";
pub const TRANSFER_TYPE_ID: &str = "transfer";

const DEPOSIT_COMMAND: &str = "DEPOSIT";
const TRANSFER_COMMAND: &str = "TRANSFER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub account: String,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub from_account: String,
    pub to_account: String,
    pub amount: i64,
}

/// Wire wrapper: a type tag plus the JSON text of the typed body.
#[derive(Debug, Serialize, Deserialize)]
struct PolymorphicMessage {
    #[serde(rename = "type")]
    type_id: String,
    body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    Deposit(Deposit),
    Transfer(Transfer),
}

impl Transaction {
    pub fn deposit(account: impl Into<String>, amount: i64) -> Self {
        Self::Deposit(Deposit {
            account: account.into(),
            amount,
        })
    }

    pub fn transfer(from: impl Into<String>, to: impl Into<String>, amount: i64) -> Self {
        Self::Transfer(Transfer {
            from_account: from.into(),
            to_account: to.into(),
            amount,
        })
    }

    pub fn type_id(&self) -> &'static str {
        match self {
            Self::Deposit(_) => DEPOSIT_TYPE_ID,
            Self::Transfer(_) => TRANSFER_TYPE_ID,
        }
    }

    /// TO-layer path this transaction is multicast on.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Deposit(_) => DEPOSIT_PATH,
            Self::Transfer(_) => TRANSFER_PATH,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = match self {
            Self::Deposit(deposit) => serde_json::to_string(deposit)?,
            Self::Transfer(transfer) => serde_json::to_string(transfer)?,
        };
        let message = PolymorphicMessage {
            type_id: self.type_id().to_string(),
            body,
        };
        Ok(serde_json::to_vec(&message)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let message: PolymorphicMessage = serde_json::from_slice(data)?;
        match message.type_id.as_str() {
            DEPOSIT_TYPE_ID => Ok(Self::Deposit(serde_json::from_str(&message.body)?)),
            TRANSFER_TYPE_ID => Ok(Self::Transfer(serde_json::from_str(&message.body)?)),
            _ => Err(BankError::UnknownTransactionType(message.type_id)),
        }
    }
}

impl FromStr for Transaction {
    type Err = BankError;

    /// Parse one input command.
    fn from_str(line: &str) -> Result<Self> {
        let invalid = |reason: &str| BankError::InvalidCommand {
            line: line.to_string(),
            reason: reason.to_string(),
        };
        let parse_amount = |raw: &str| {
            raw.parse::<i64>()
                .map_err(|e| invalid(&format!("bad amount [{raw}]: {e}")))
        };

        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [] => Err(invalid("empty fields")),
            [DEPOSIT_COMMAND, account, amount] => {
                Ok(Self::deposit(*account, parse_amount(*amount)?))
            }
            [DEPOSIT_COMMAND, ..] => Err(invalid("expected DEPOSIT <account> <amount>")),
            [TRANSFER_COMMAND, from, "TO", to, amount] => {
                Ok(Self::transfer(*from, *to, parse_amount(*amount)?))
            }
            [TRANSFER_COMMAND, ..] => {
                Err(invalid("expected TRANSFER <from> TO <to> <amount>"))
            }
            _ => Err(invalid("unrecognized event type")),
        }
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deposit(d) => write!(f, "{DEPOSIT_COMMAND} {} {}", d.account, d.amount),
            Self::Transfer(t) => write!(
                f,
                "{TRANSFER_COMMAND} {} TO {} {}",
                t.from_account, t.to_account, t.amount
            ),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches};

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "DEPOSIT wqkby 10".parse::<Transaction>().unwrap(),
            Transaction::deposit("wqkby", 10)
        );
        assert_eq!(
            "  TRANSFER yxpqg TO wqkby 75 ".parse::<Transaction>().unwrap(),
            Transaction::transfer("yxpqg", "wqkby", 75)
        );
        // The ledger, not the parser, rejects negative amounts.
        assert_eq!(
            "DEPOSIT a -5".parse::<Transaction>().unwrap(),
            Transaction::deposit("a", -5)
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for line in [
            "",
            "   ",
            "WITHDRAW a 10",
            "DEPOSIT a",
            "DEPOSIT a ten",
            "TRANSFER a b 10",
            "TRANSFER a FROM b 10",
            "deposit a 10",
        ] {
            assert_matches!(
                line.parse::<Transaction>(),
                Err(BankError::InvalidCommand { .. }),
                "{line:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_payload_shape() {
        let bytes = Transaction::deposit("a", 10).encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "deposit");
        assert_eq!(value["body"], r#"{"account":"a","amount":10}"#);

        let tx = Transaction::transfer("a", "b", 3);
        assert_eq!(Transaction::decode(&tx.encode().unwrap()).unwrap(), tx);
    }

    #[test]
    fn test_decode_unknown_type() {
        assert_matches!(
            Transaction::decode(br#"{"type":"withdraw","body":"{}"}"#),
            Err(BankError::UnknownTransactionType(t)) if t == "withdraw"
        );
        assert_matches!(
            Transaction::decode(br#"{"type":"deposit","body":"not json"}"#),
            Err(BankError::Serialization(_))
        );
    }

    #[test]
    fn test_display_matches_command() {
        let tx = Transaction::transfer("a", "b", 3);
        assert_eq!(tx.to_string().parse::<Transaction>().unwrap(), tx);
        assert_eq!(tx.path(), TRANSFER_PATH);
    }
}
