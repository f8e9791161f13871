// src/pix_code.rs
//
// Builder for merchant-presented PIX "copia e cola" payloads (BR Code,
// EMV-style tag-length-value). Pure transform: no I/O, no clock.

use std::fmt;

const PAYLOAD_FORMAT_INDICATOR: &str = "01";
const INITIATION_METHOD_STATIC: &str = "12";
const MERCHANT_ACCOUNT_GUI: &str = "br.gov.bcb.pix";
const MERCHANT_CATEGORY_CODE: &str = "0000";
const CURRENCY_BRL: &str = "986";
const COUNTRY_CODE: &str = "BR";

const MAX_PAYEE_KEY_LEN: usize = 77;
const MAX_NAME_LEN: usize = 25;
const MAX_CITY_LEN: usize = 15;
const MAX_TX_ID_LEN: usize = 25;

#[derive(Debug, PartialEq, Eq)]
pub enum PixCodeError {
    EmptyPayeeKey,
}

impl fmt::Display for PixCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixCodeError::EmptyPayeeKey => write!(f, "payee key must not be empty"),
        }
    }
}

#[derive(Debug)]
pub struct PixCodeRequest<'a> {
    pub payee_key: &'a str,
    pub payee_name: &'a str,
    pub payee_city: &'a str,
    pub amount: f64,
    pub transaction_id: &'a str,
    pub description: Option<&'a str>,
}

/// Builds the full BR Code text for a payment request.
///
/// Only an empty payee key is rejected. Everything else is clamped or
/// truncated so a checkout screen always gets a scannable code back.
pub fn build_payload(req: &PixCodeRequest) -> Result<String, PixCodeError> {
    let key = ascii_clamp(req.payee_key, MAX_PAYEE_KEY_LEN);
    if key.is_empty() {
        return Err(PixCodeError::EmptyPayeeKey);
    }

    let name = ascii_clamp(req.payee_name, MAX_NAME_LEN);
    let city = ascii_clamp(req.payee_city, MAX_CITY_LEN);
    let tx_id = ascii_clamp(req.transaction_id, MAX_TX_ID_LEN);

    let mut payload = String::new();
    payload.push_str(&field("00", PAYLOAD_FORMAT_INDICATOR));
    payload.push_str(&field("01", INITIATION_METHOD_STATIC));

    let account = format!("{}{}", field("00", MERCHANT_ACCOUNT_GUI), field("01", &key));
    payload.push_str(&field("26", &account));

    payload.push_str(&field("52", MERCHANT_CATEGORY_CODE));
    payload.push_str(&field("53", CURRENCY_BRL));

    if req.amount > 0.0 {
        payload.push_str(&field("54", &format!("{:.2}", req.amount)));
    }

    payload.push_str(&field("58", COUNTRY_CODE));
    payload.push_str(&field("59", &name));
    payload.push_str(&field("60", &city));

    if !tx_id.is_empty() {
        let mut additional = field("05", &tx_id);
        if let Some(description) = req.description {
            let description = ascii_clamp(description, MAX_TX_ID_LEN);
            if !description.is_empty() {
                additional.push_str(&field("02", &description));
            }
        }
        payload.push_str(&field("62", &additional));
    }

    // The CRC covers everything emitted so far plus its own "6304" header.
    payload.push_str("6304");
    let crc = crc16_ccitt(payload.as_bytes());
    payload.push_str(&format!("{crc:04X}"));

    Ok(payload)
}

fn field(tag: &str, value: &str) -> String {
    format!("{tag}{:02}{value}", value.len())
}

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, MSB-first, no final XOR.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Folds diacritics to plain ASCII, drops anything else non-ASCII and
/// truncates to `max` characters. Payment apps reject payloads with
/// accented characters in the name/city fields.
fn ascii_clamp(value: &str, max: usize) -> String {
    value
        .trim()
        .chars()
        .filter_map(fold_char)
        .filter(|c| c.is_ascii() && (!c.is_ascii_control()))
        .take(max)
        .collect()
}

fn fold_char(c: char) -> Option<char> {
    let folded = match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'ç' => 'c',
        'Ç' => 'C',
        'ñ' => 'n',
        'Ñ' => 'N',
        other => other,
    };
    if folded.is_ascii() {
        Some(folded)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> PixCodeRequest<'static> {
        PixCodeRequest {
            payee_key: "pagamentos@marmita.com.br",
            payee_name: "Marmita Delivery",
            payee_city: "Sao Paulo",
            amount: 45.90,
            transaction_id: "PIX-1700000000000-abc12345",
            description: None,
        }
    }

    /// Decodes one TLV level. Good enough for round-trip assertions.
    fn decode_tlv(payload: &str) -> Vec<(String, String)> {
        let mut fields = Vec::new();
        let bytes = payload.as_bytes();
        let mut pos = 0;
        while pos + 4 <= bytes.len() {
            let tag = &payload[pos..pos + 2];
            let len: usize = payload[pos + 2..pos + 4].parse().expect("tlv length");
            let value = &payload[pos + 4..pos + 4 + len];
            fields.push((tag.to_string(), value.to_string()));
            pos += 4 + len;
        }
        fields
    }

    fn value_of<'a>(fields: &'a [(String, String)], tag: &str) -> Option<&'a str> {
        fields
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn crc16_known_vector() {
        // CRC-16/CCITT-FALSE reference vector.
        assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
    }

    #[test]
    fn payload_checksum_is_self_consistent() {
        let payload = build_payload(&sample_request()).unwrap();
        let (body, crc_hex) = payload.split_at(payload.len() - 4);
        assert!(body.ends_with("6304"));
        let expected = format!("{:04X}", crc16_ccitt(body.as_bytes()));
        assert_eq!(crc_hex, expected);
    }

    #[test]
    fn single_byte_mutation_breaks_checksum() {
        let payload = build_payload(&sample_request()).unwrap();
        let (body, crc_hex) = payload.split_at(payload.len() - 4);
        for i in 0..body.len() - 4 {
            let mut mutated = body.as_bytes().to_vec();
            mutated[i] = if mutated[i] == b'X' { b'Y' } else { b'X' };
            let crc = format!("{:04X}", crc16_ccitt(&mutated));
            assert_ne!(crc, crc_hex, "mutation at byte {i} kept the checksum");
        }
    }

    #[test]
    fn field_order_and_round_trip() {
        let payload = build_payload(&sample_request()).unwrap();
        let fields = decode_tlv(&payload);

        let tags: Vec<&str> = fields.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(
            tags,
            vec!["00", "01", "26", "52", "53", "54", "58", "59", "60", "62", "63"]
        );

        assert_eq!(value_of(&fields, "00"), Some("01"));
        assert_eq!(value_of(&fields, "01"), Some("12"));
        assert_eq!(value_of(&fields, "52"), Some("0000"));
        assert_eq!(value_of(&fields, "53"), Some("986"));
        assert_eq!(value_of(&fields, "54"), Some("45.90"));
        assert_eq!(value_of(&fields, "58"), Some("BR"));
        assert_eq!(value_of(&fields, "59"), Some("Marmita Delivery"));
        assert_eq!(value_of(&fields, "60"), Some("Sao Paulo"));

        let account = decode_tlv(value_of(&fields, "26").unwrap());
        assert_eq!(value_of(&account, "00"), Some("br.gov.bcb.pix"));
        assert_eq!(value_of(&account, "01"), Some("pagamentos@marmita.com.br"));

        let additional = decode_tlv(value_of(&fields, "62").unwrap());
        // Transaction id truncated to 25 chars.
        assert_eq!(value_of(&additional, "05"), Some("PIX-1700000000000-abc1234"));
    }

    #[test]
    fn zero_amount_omits_amount_field() {
        let mut req = sample_request();
        req.amount = 0.0;
        let payload = build_payload(&req).unwrap();
        let fields = decode_tlv(&payload);
        assert!(value_of(&fields, "54").is_none());
    }

    #[test]
    fn description_lands_in_additional_block() {
        let mut req = sample_request();
        req.description = Some("Pedido 42");
        let payload = build_payload(&req).unwrap();
        let fields = decode_tlv(&payload);
        let additional = decode_tlv(value_of(&fields, "62").unwrap());
        assert_eq!(value_of(&additional, "02"), Some("Pedido 42"));
    }

    #[test]
    fn name_is_truncated_and_diacritics_folded() {
        let mut req = sample_request();
        req.payee_name = "Restaurante São João da Esquina e Companhia";
        req.payee_city = "São José dos Campos";
        let payload = build_payload(&req).unwrap();
        let fields = decode_tlv(&payload);

        let name = value_of(&fields, "59").unwrap();
        assert_eq!(name, "Restaurante Sao Joao da E");
        assert_eq!(name.len(), 25);

        let city = value_of(&fields, "60").unwrap();
        assert_eq!(city, "Sao Jose dos Ca");
        assert_eq!(city.len(), 15);
    }

    #[test]
    fn empty_payee_key_is_rejected() {
        let mut req = sample_request();
        req.payee_key = "  ";
        assert_eq!(build_payload(&req), Err(PixCodeError::EmptyPayeeKey));
    }

    #[test]
    fn oversized_key_is_clamped_not_rejected() {
        let long_key = "k".repeat(200);
        let mut req = sample_request();
        req.payee_key = &long_key;
        let payload = build_payload(&req).unwrap();
        let fields = decode_tlv(&payload);
        let account = decode_tlv(value_of(&fields, "26").unwrap());
        assert_eq!(value_of(&account, "01").unwrap().len(), 77);
    }
}
