use num_bigint::BigUint;

/// `0x` prefix plus two 32-byte words in hex.
pub const PAYLOAD_LEN: usize = 130;

const WALLET_START: usize = 26;
const WALLET_END: usize = 66;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid payload length: expected 130, got {0}")]
    Length(usize),
    #[error("payload contains non-hex characters")]
    NotHex,
}

/// The (wallet, amount) pair carried in a Staked/UnStaked log's data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakePayload {
    pub wallet: String,
    pub amount: BigUint,
}

/// Decode `raw_data` of a staking event.
///
/// Word 1 holds the wallet (its low 20 bytes), word 2 the unsigned amount.
pub fn decode_stake_payload(data: &str) -> Result<StakePayload, DecodeError> {
    if data.len() != PAYLOAD_LEN {
        return Err(DecodeError::Length(data.len()));
    }
    if !data.is_ascii() || !data[2..].bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DecodeError::NotHex);
    }

    let wallet = format!("0x{}", data[WALLET_START..WALLET_END].to_ascii_lowercase());
    let amount =
        BigUint::parse_bytes(data[WALLET_END..].as_bytes(), 16).ok_or(DecodeError::NotHex)?;

    Ok(StakePayload { wallet, amount })
}
