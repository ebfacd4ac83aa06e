//! Typed payloads of the token-domain events.

use super::ids::{TokenDataId, TokenId};
use crate::types::Event;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

pub const WITHDRAW_EVENT: &str = "0x3::token::WithdrawEvent";
pub const DEPOSIT_EVENT: &str = "0x3::token::DepositEvent";
pub const MINT_TOKEN_EVENT: &str = "0x3::token::MintTokenEvent";
pub const BURN_TOKEN_EVENT: &str = "0x3::token::BurnTokenEvent";
pub const CREATE_TOKEN_DATA_EVENT: &str = "0x3::token::CreateTokenDataEvent";
pub const CREATE_COLLECTION_EVENT: &str = "0x3::token::CreateCollectionEvent";
pub const MUTATE_TOKEN_PROPERTY_MAP_EVENT: &str = "0x3::token::MutateTokenPropertyMapEvent";
pub const TOKEN_SWAP_EVENT: &str = "0x3::token_coin_swap::TokenSwapEvent";
pub const TOKEN_LISTING_EVENT: &str = "0x3::token_coin_swap::TokenListingEvent";
pub const TOKEN_OFFER_EVENT: &str = "0x3::token_transfers::TokenOfferEvent";
pub const TOKEN_CLAIM_EVENT: &str = "0x3::token_transfers::TokenClaimEvent";
pub const TOKEN_CANCEL_OFFER_EVENT: &str = "0x3::token_transfers::TokenCancelOfferEvent";

/// Accepts a `u64` encoded either as a JSON number or as a decimal string.
pub(crate) fn de_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_u64()
            .ok_or_else(|| de::Error::custom(format!("{number} is not a u64"))),
        Value::String(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|err| de::Error::custom(format!("invalid u64 {raw:?}: {err}"))),
        other => Err(de::Error::custom(format!("expected u64, found {other}"))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenAmount {
    pub id: TokenId,
    #[serde(deserialize_with = "de_u64")]
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum MintedId {
    Data(TokenDataId),
    Token(TokenId),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct RawMint {
    id: MintedId,
    #[serde(deserialize_with = "de_u64")]
    amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mint {
    pub id: TokenDataId,
    pub amount: u64,
}

impl From<RawMint> for Mint {
    fn from(raw: RawMint) -> Self {
        let id = match raw.id {
            MintedId::Data(id) => id,
            MintedId::Token(id) => id.token_data_id,
        };
        Self {
            id,
            amount: raw.amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateTokenData {
    pub id: TokenDataId,
    #[serde(default)]
    pub description: String,
    #[serde(deserialize_with = "de_u64", default)]
    pub maximum: u64,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub royalty_payee_address: String,
    #[serde(deserialize_with = "de_u64", default)]
    pub royalty_points_denominator: u64,
    #[serde(
        deserialize_with = "de_u64",
        default,
        alias = "royal_points_numerator"
    )]
    pub royalty_points_numerator: u64,
    #[serde(default)]
    pub property_keys: Vec<String>,
    #[serde(default)]
    pub property_values: Vec<String>,
    #[serde(default)]
    pub property_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateCollection {
    pub creator: String,
    pub collection_name: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub description: String,
    #[serde(deserialize_with = "de_u64", default)]
    pub maximum: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MutateTokenPropertyMap {
    pub old_id: TokenId,
    pub new_id: TokenId,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CoinTypeInfo {
    pub account_address: String,
    pub module_name: String,
    pub struct_name: String,
}

impl CoinTypeInfo {
    /// `address::module::Struct`, with hex-encoded names decoded to UTF-8.
    pub fn type_tag(&self) -> String {
        format!(
            "{}::{}::{}",
            self.account_address,
            decode_name(&self.module_name),
            decode_name(&self.struct_name)
        )
    }
}

fn decode_name(raw: &str) -> String {
    raw.strip_prefix("0x")
        .and_then(|digits| hex::decode(digits).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| raw.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenListing {
    pub token_id: TokenId,
    #[serde(deserialize_with = "de_u64")]
    pub amount: u64,
    #[serde(deserialize_with = "de_u64", default)]
    pub min_price: u64,
    #[serde(deserialize_with = "de_u64", default)]
    pub locked_until_secs: u64,
    pub coin_type_info: CoinTypeInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenSwap {
    pub token_id: TokenId,
    pub token_buyer: String,
    #[serde(deserialize_with = "de_u64")]
    pub token_amount: u64,
    #[serde(deserialize_with = "de_u64")]
    pub coin_amount: u64,
    pub coin_type_info: CoinTypeInfo,
}

/// Offer, claim and cancel-offer share this payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransferOffer {
    pub to_address: String,
    pub token_id: TokenId,
    #[serde(deserialize_with = "de_u64")]
    pub amount: u64,
}

/// Every token-domain event the indexer understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    Withdraw(TokenAmount),
    Deposit(TokenAmount),
    Mint(Mint),
    Burn(TokenAmount),
    CreateTokenData(CreateTokenData),
    CreateCollection(CreateCollection),
    MutateProperties(MutateTokenPropertyMap),
    Swap(TokenSwap),
    Listing(TokenListing),
    Offer(TransferOffer),
    Claim(TransferOffer),
    CancelOffer(TransferOffer),
}

impl TokenEvent {
    /// `None` for type tags outside the token domain.
    pub fn decode(type_tag: &str, data: &Value) -> Option<Result<Self, serde_json::Error>> {
        fn parse<T: for<'de> Deserialize<'de>>(data: &Value) -> Result<T, serde_json::Error> {
            T::deserialize(data)
        }

        let decoded = match type_tag {
            WITHDRAW_EVENT => parse(data).map(Self::Withdraw),
            DEPOSIT_EVENT => parse(data).map(Self::Deposit),
            MINT_TOKEN_EVENT => parse::<RawMint>(data).map(|raw| Self::Mint(raw.into())),
            BURN_TOKEN_EVENT => parse(data).map(Self::Burn),
            CREATE_TOKEN_DATA_EVENT => parse(data).map(Self::CreateTokenData),
            CREATE_COLLECTION_EVENT => parse(data).map(Self::CreateCollection),
            MUTATE_TOKEN_PROPERTY_MAP_EVENT => parse(data).map(Self::MutateProperties),
            TOKEN_SWAP_EVENT => parse(data).map(Self::Swap),
            TOKEN_LISTING_EVENT => parse(data).map(Self::Listing),
            TOKEN_OFFER_EVENT => parse(data).map(Self::Offer),
            TOKEN_CLAIM_EVENT => parse(data).map(Self::Claim),
            TOKEN_CANCEL_OFFER_EVENT => parse(data).map(Self::CancelOffer),
            _ => return None,
        };
        Some(decoded)
    }
}

/// A decoded event together with the coordinates of the event that carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEventRecord {
    pub key: String,
    pub sequence_number: u64,
    pub type_tag: String,
    /// Account owning the event handle; the sender when the key is opaque.
    pub account: String,
    pub event: TokenEvent,
}

impl TokenEventRecord {
    pub fn from_event(event: &Event, sender: &str) -> Option<Result<Self, serde_json::Error>> {
        let decoded = TokenEvent::decode(&event.type_tag, &event.data)?;
        Some(decoded.map(|token_event| Self {
            key: event.key.clone(),
            sequence_number: event.sequence_number,
            type_tag: event.type_tag.clone(),
            account: event
                .account_address()
                .unwrap_or_else(|| sender.to_string()),
            event: token_event,
        }))
    }
}
