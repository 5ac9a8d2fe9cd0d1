use std::sync::Arc;

use ethers::{ abi::{ Abi, Token }, prelude::*, types::{ Address, U256 } };
use lazy_static::lazy_static;
use sea_orm::prelude::Decimal;

use crate::error::{ AppError, Result };
use crate::providers::ForecastParam;

/// Decimals of the GameUSD and credit tokens.
pub const GAME_TOKEN_DECIMALS: u32 = 18;

const ERC20_SIGNATURES: &[&str] = &[
    "function balanceOf(address) view returns (uint256)",
    "function transfer(address to, uint256 amount) returns (bool)",
];

const GAME_USD_SIGNATURES: &[&str] = &[
    "function deposit(address user, uint256 amount)",
    "function redeem(uint256 amount, address to)",
];

const BETTING_SIGNATURES: &[&str] = &[
    "function bet(address user, (uint256,uint256,uint8,uint256)[] bets)",
    "function betWithCredit(address user, (uint256,uint256,uint8,uint256)[] bets)",
    "function claim(address user, (uint256,uint256,uint8,uint256)[] claims)",
];

const CREDIT_SIGNATURES: &[&str] = &[
    "function depositCredit(address user, uint256 amount)",
    "function revokeCredit(address user, uint256 amount)",
];

const POOL_SIGNATURES: &[&str] = &["function payout(uint256 amount, address to, bytes signature)"];

lazy_static! {
    static ref ERC20_ABI: std::result::Result<Abi, String> = parse(ERC20_SIGNATURES);
    static ref GAME_USD_ABI: std::result::Result<Abi, String> = parse(GAME_USD_SIGNATURES);
    static ref BETTING_ABI: std::result::Result<Abi, String> = parse(BETTING_SIGNATURES);
    static ref CREDIT_ABI: std::result::Result<Abi, String> = parse(CREDIT_SIGNATURES);
    static ref POOL_ABI: std::result::Result<Abi, String> = parse(POOL_SIGNATURES);
}

fn parse(signatures: &[&str]) -> std::result::Result<Abi, String> {
    ethers::abi::parse_abi(signatures).map_err(|e| e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractKind {
    Erc20,
    GameUsd,
    Betting,
    Credit,
    Pool,
}

pub fn abi(kind: ContractKind) -> Result<Abi> {
    let parsed = match kind {
        ContractKind::Erc20 => &*ERC20_ABI,
        ContractKind::GameUsd => &*GAME_USD_ABI,
        ContractKind::Betting => &*BETTING_ABI,
        ContractKind::Credit => &*CREDIT_ABI,
        ContractKind::Pool => &*POOL_ABI,
    };

    parsed.clone().map_err(|e| AppError::Chain(format!("Failed to parse {:?} ABI: {}", kind, e)))
}

pub fn contract<M: Middleware + 'static>(
    kind: ContractKind,
    address: &str,
    client: Arc<M>
) -> Result<Contract<M>> {
    let address: Address = address.parse().map_err(|_| AppError::InvalidAddress)?;
    Ok(Contract::new(address, abi(kind)?, client))
}

/// Convert a ledger amount into token base units.
pub fn to_units(amount: Decimal, decimals: u32) -> Result<U256> {
    if amount.is_sign_negative() {
        return Err(AppError::InvalidInput(format!("Negative on-chain amount: {}", amount)));
    }

    let rounded = amount.round_dp(decimals).normalize();
    let units = ethers::utils
        ::parse_units(rounded.to_string(), decimals)
        .map_err(|e| AppError::InvalidInput(format!("Invalid amount {}: {}", amount, e)))?;

    Ok(units.into())
}

/// Convert token base units back into a ledger amount.
pub fn from_units(units: U256, decimals: u32) -> Result<Decimal> {
    let formatted = ethers::utils
        ::format_units(units, decimals)
        .map_err(|e| AppError::Chain(format!("Failed to format units: {}", e)))?;

    formatted
        .parse::<Decimal>()
        .map_err(|e| AppError::Chain(format!("Unrepresentable amount {}: {}", formatted, e)))
}

pub fn address_token(address: &str) -> Result<Token> {
    let address: Address = address.parse().map_err(|_| AppError::InvalidAddress)?;
    Ok(Token::Address(address))
}

/// `(epoch, number, forecast, amount)[]` as the betting contract expects it.
pub fn forecast_tokens(params: &[ForecastParam]) -> Result<Token> {
    let mut entries = Vec::with_capacity(params.len());

    for param in params {
        let number: u64 = param.number
            .parse()
            .map_err(|_| AppError::InvalidInput(format!("Invalid number pair: {}", param.number)))?;
        let epoch = u64
            ::try_from(param.epoch)
            .map_err(|_| AppError::InvalidInput(format!("Invalid epoch: {}", param.epoch)))?;

        entries.push(
            Token::Tuple(
                vec![
                    Token::Uint(U256::from(epoch)),
                    Token::Uint(U256::from(number)),
                    Token::Uint(U256::from(param.forecast.contract_code())),
                    Token::Uint(to_units(param.amount, GAME_TOKEN_DECIMALS)?)
                ]
            )
        );
    }

    Ok(Token::Array(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::Forecast;

    #[test]
    fn test_all_abis_parse() {
        for kind in [
            ContractKind::Erc20,
            ContractKind::GameUsd,
            ContractKind::Betting,
            ContractKind::Credit,
            ContractKind::Pool,
        ] {
            assert!(abi(kind).is_ok(), "{:?} failed to parse", kind);
        }

        let betting = abi(ContractKind::Betting).unwrap();
        assert!(betting.function("betWithCredit").is_ok());
    }

    #[test]
    fn test_unit_conversion() {
        let units = to_units(Decimal::new(75, 1), 6).unwrap();
        assert_eq!(units, U256::from(7_500_000u64));
        assert_eq!(from_units(units, 6).unwrap(), Decimal::new(75, 1));

        // Sub-unit dust is rounded away instead of rejected
        let dusty = to_units(Decimal::new(1_0000001, 7), 6).unwrap();
        assert_eq!(dusty, U256::from(1_000_000u64));

        assert!(to_units(Decimal::new(-1, 0), 6).is_err());
    }

    #[test]
    fn test_forecast_tokens_encode_each_entry() {
        let params = vec![ForecastParam {
            epoch: 12,
            number: "0042".to_string(),
            forecast: Forecast::Small,
            amount: Decimal::from(3),
        }];

        let Token::Array(entries) = forecast_tokens(&params).unwrap() else {
            panic!("expected an array token");
        };
        assert_eq!(entries.len(), 1);
        let Token::Tuple(fields) = &entries[0] else {
            panic!("expected a tuple token");
        };
        assert_eq!(fields[1], Token::Uint(U256::from(42u64)));
        assert_eq!(fields[2], Token::Uint(U256::from(2u64)));
    }
}
