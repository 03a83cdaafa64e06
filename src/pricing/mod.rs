//! Country to currency resolution, converted plan prices and display formatting.

pub mod api;
pub mod geo;

use serde::Serialize;

use crate::billing::models::Tier;

pub use geo::GeoLocator;

/// Currency the price list is authored in.
pub const BASE_CURRENCY: &str = "ZAR";
/// Formatting falls back to this currency when a code is not in the table.
pub const DISPLAY_FALLBACK_CURRENCY: &str = "NGN";

pub const BASE_PRO_PRICE: i64 = 1100;
pub const BASE_ENTERPRISE_PRICE: i64 = 1800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolPosition {
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Currency {
    pub code: &'static str,
    pub symbol: &'static str,
    pub name: &'static str,
    pub position: SymbolPosition,
    pub decimal_places: usize,
}

const fn currency(code: &'static str, symbol: &'static str, name: &'static str) -> Currency {
    Currency {
        code,
        symbol,
        name,
        position: SymbolPosition::Before,
        decimal_places: 2,
    }
}

// key: pricing-currencies -> supported display currencies
pub static CURRENCIES: &[Currency] = &[
    currency("ZAR", "R", "South African Rand"),
    currency("NGN", "₦", "Nigerian Naira"),
    currency("GHS", "₵", "Ghanaian Cedi"),
    currency("KES", "KSh", "Kenyan Shilling"),
    currency("EGP", "E£", "Egyptian Pound"),
    currency("MAD", "MAD", "Moroccan Dirham"),
    currency("TND", "DT", "Tunisian Dinar"),
    currency("DZD", "DA", "Algerian Dinar"),
    currency("ETB", "Br", "Ethiopian Birr"),
    currency("UGX", "USh", "Ugandan Shilling"),
    currency("TZS", "TSh", "Tanzanian Shilling"),
    currency("BWP", "P", "Botswana Pula"),
    currency("ZMW", "ZK", "Zambian Kwacha"),
    currency("MWK", "MK", "Malawian Kwacha"),
    currency("MZN", "MT", "Mozambican Metical"),
    currency("AOA", "Kz", "Angolan Kwanza"),
    currency("USD", "$", "US Dollar"),
    currency("EUR", "€", "Euro"),
    currency("GBP", "£", "British Pound"),
    currency("CAD", "C$", "Canadian Dollar"),
    currency("AUD", "A$", "Australian Dollar"),
    Currency {
        code: "JPY",
        symbol: "¥",
        name: "Japanese Yen",
        position: SymbolPosition::Before,
        decimal_places: 0,
    },
    currency("CNY", "¥", "Chinese Yuan"),
    currency("INR", "₹", "Indian Rupee"),
    currency("BRL", "R$", "Brazilian Real"),
    currency("MXN", "$", "Mexican Peso"),
    currency("ARS", "$", "Argentine Peso"),
    currency("CLP", "$", "Chilean Peso"),
    currency("COP", "$", "Colombian Peso"),
    currency("PEN", "S/", "Peruvian Sol"),
    currency("UYU", "$U", "Uruguayan Peso"),
    currency("AED", "د.إ", "UAE Dirham"),
    currency("SAR", "﷼", "Saudi Riyal"),
    currency("QAR", "﷼", "Qatari Riyal"),
    currency("KWD", "د.ك", "Kuwaiti Dinar"),
    currency("BHD", "د.ب", "Bahraini Dinar"),
    currency("OMR", "﷼", "Omani Rial"),
    currency("JOD", "د.ا", "Jordanian Dinar"),
    currency("LBP", "ل.ل", "Lebanese Pound"),
    currency("ILS", "₪", "Israeli Shekel"),
    currency("TRY", "₺", "Turkish Lira"),
    currency("SGD", "S$", "Singapore Dollar"),
    currency("MYR", "RM", "Malaysian Ringgit"),
    currency("THB", "฿", "Thai Baht"),
    currency("IDR", "Rp", "Indonesian Rupiah"),
    currency("PHP", "₱", "Philippine Peso"),
    currency("VND", "₫", "Vietnamese Dong"),
    currency("KRW", "₩", "South Korean Won"),
    currency("TWD", "NT$", "Taiwan Dollar"),
    currency("HKD", "HK$", "Hong Kong Dollar"),
    currency("CHF", "CHF", "Swiss Franc"),
    currency("SEK", "kr", "Swedish Krona"),
    currency("NOK", "kr", "Norwegian Krone"),
    currency("DKK", "kr", "Danish Krone"),
    currency("PLN", "zł", "Polish Zloty"),
    currency("CZK", "Kč", "Czech Koruna"),
    currency("HUF", "Ft", "Hungarian Forint"),
    currency("RON", "lei", "Romanian Leu"),
    currency("BGN", "лв", "Bulgarian Lev"),
    currency("HRK", "kn", "Croatian Kuna"),
    currency("RSD", "дин", "Serbian Dinar"),
    currency("UAH", "₴", "Ukrainian Hryvnia"),
    currency("RUB", "₽", "Russian Ruble"),
];

pub fn lookup_currency(code: &str) -> Option<&'static Currency> {
    let code = code.trim();
    CURRENCIES
        .iter()
        .find(|currency| currency.code.eq_ignore_ascii_case(code))
}

fn display_currency(code: &str) -> &'static Currency {
    lookup_currency(code)
        .or_else(|| lookup_currency(DISPLAY_FALLBACK_CURRENCY))
        .unwrap_or(&CURRENCIES[0])
}

// key: pricing-country-map -> ISO 3166 alpha-2 to currency code, `ZAR` when unknown
pub fn currency_for_country(country: Option<&str>) -> &'static str {
    let Some(country) = country.map(str::trim).filter(|value| !value.is_empty()) else {
        return BASE_CURRENCY;
    };
    match country.to_ascii_uppercase().as_str() {
        "ZA" | "ZW" | "LS" | "SZ" | "NA" => "ZAR",
        "NG" => "NGN",
        "GH" => "GHS",
        "KE" => "KES",
        "EG" => "EGP",
        "MA" => "MAD",
        "TN" => "TND",
        "DZ" => "DZD",
        "ET" => "ETB",
        "UG" => "UGX",
        "TZ" => "TZS",
        "BW" => "BWP",
        "ZM" => "ZMW",
        "MW" => "MWK",
        "MZ" => "MZN",
        "AO" => "AOA",
        "US" => "USD",
        "CA" => "CAD",
        "MX" => "MXN",
        "BR" => "BRL",
        "AR" => "ARS",
        "CL" => "CLP",
        "CO" => "COP",
        "PE" => "PEN",
        "UY" => "UYU",
        "GB" => "GBP",
        "DE" | "FR" | "IT" | "ES" | "NL" | "BE" | "AT" | "FI" | "IE" | "PT" | "GR" | "LU"
        | "MT" | "CY" | "SI" | "SK" | "EE" | "LV" | "LT" => "EUR",
        "CH" => "CHF",
        "SE" => "SEK",
        "NO" => "NOK",
        "DK" => "DKK",
        "PL" => "PLN",
        "CZ" => "CZK",
        "HU" => "HUF",
        "RO" => "RON",
        "BG" => "BGN",
        "HR" => "HRK",
        "RS" => "RSD",
        "UA" => "UAH",
        "RU" => "RUB",
        "TR" => "TRY",
        "AE" => "AED",
        "SA" => "SAR",
        "QA" => "QAR",
        "KW" => "KWD",
        "BH" => "BHD",
        "OM" => "OMR",
        "JO" => "JOD",
        "LB" => "LBP",
        "IL" => "ILS",
        "CN" => "CNY",
        "JP" => "JPY",
        "KR" => "KRW",
        "IN" => "INR",
        "SG" => "SGD",
        "MY" => "MYR",
        "TH" => "THB",
        "ID" => "IDR",
        "PH" => "PHP",
        "VN" => "VND",
        "TW" => "TWD",
        "HK" => "HKD",
        "AU" => "AUD",
        "NZ" => "NZD",
        "FJ" => "FJD",
        "PG" => "PGK",
        _ => BASE_CURRENCY,
    }
}

/// Units of `currency` per one ZAR. Unknown currencies are priced 1:1.
pub fn rate(currency: &str) -> f64 {
    match currency.trim().to_ascii_uppercase().as_str() {
        "ZAR" => 1.0,
        "USD" => 0.055,
        "EUR" => 0.051,
        "GBP" => 0.044,
        "NGN" => 85.0,
        "GHS" => 0.67,
        "KES" => 7.2,
        "EGP" => 1.7,
        "MAD" => 0.55,
        "TND" => 0.17,
        "DZD" => 7.4,
        "ETB" => 3.1,
        "UGX" => 204.0,
        "TZS" => 130.0,
        "BWP" => 0.74,
        "ZMW" => 1.1,
        "MWK" => 95.0,
        "MZN" => 3.5,
        "AOA" => 45.0,
        "CAD" => 0.075,
        "AUD" => 0.083,
        "JPY" => 8.2,
        "CNY" => 0.40,
        "INR" => 4.6,
        "BRL" => 0.28,
        "MXN" => 0.95,
        "ARS" => 45.0,
        "CLP" => 50.0,
        "COP" => 220.0,
        "PEN" => 0.21,
        "UYU" => 2.1,
        "AED" => 0.20,
        "SAR" => 0.21,
        "QAR" => 0.20,
        "KWD" => 0.017,
        "BHD" => 0.021,
        "OMR" => 0.021,
        "JOD" => 0.039,
        "LBP" => 830.0,
        "ILS" => 0.20,
        "TRY" => 1.7,
        "SGD" => 0.075,
        "MYR" => 0.26,
        "THB" => 2.0,
        "IDR" => 850.0,
        "PHP" => 3.1,
        "VND" => 1350.0,
        "KRW" => 73.0,
        "TWD" => 1.8,
        "HKD" => 0.43,
        "CHF" => 0.049,
        "SEK" => 0.58,
        "NOK" => 0.58,
        "DKK" => 0.38,
        "PLN" => 0.22,
        "CZK" => 1.3,
        "HUF" => 20.0,
        "RON" => 0.25,
        "BGN" => 0.10,
        "HRK" => 0.38,
        "RSD" => 6.0,
        "UAH" => 2.0,
        "RUB" => 5.0,
        "NZD" => 0.090,
        "FJD" => 0.12,
        "PGK" => 0.20,
        _ => 1.0,
    }
}

/// Plan prices in one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pricing {
    pub pro: i64,
    pub enterprise: i64,
    pub currency: String,
}

impl Pricing {
    /// Price of a tier; the free tier costs nothing.
    pub fn for_tier(&self, tier: Tier) -> i64 {
        match tier {
            Tier::Free => 0,
            Tier::Pro => self.pro,
            Tier::Enterprise => self.enterprise,
        }
    }
}

// key: pricing-resolver -> base prices converted and rounded to whole units
pub fn pricing(currency: &str) -> Pricing {
    let code = currency.trim().to_ascii_uppercase();
    let rate = rate(&code);
    Pricing {
        pro: (BASE_PRO_PRICE as f64 * rate).round() as i64,
        enterprise: (BASE_ENTERPRISE_PRICE as f64 * rate).round() as i64,
        currency: code,
    }
}

/// Prices in the minor unit the payment gateway charges in.
pub fn pricing_in_minor_units(currency: &str) -> Pricing {
    let whole = pricing(currency);
    Pricing {
        pro: whole.pro * 100,
        enterprise: whole.enterprise * 100,
        currency: whole.currency,
    }
}

/// Formats `amount` with the currency's symbol, `,` thousands separators and exactly its
/// configured number of decimals.
pub fn format_currency(amount: f64, currency: &str) -> String {
    let info = display_currency(currency);
    let digits = group_thousands(amount.abs(), info.decimal_places);
    let sign = if amount < 0.0 && digits.chars().any(|c| c.is_ascii_digit() && c != '0') {
        "-"
    } else {
        ""
    };
    match info.position {
        SymbolPosition::Before => format!("{sign}{}{digits}", info.symbol),
        SymbolPosition::After => format!("{sign}{digits} {}", info.symbol),
    }
}

pub fn format_minor_units(amount_minor: i64, currency: &str) -> String {
    format_currency(amount_minor as f64 / 100.0, currency)
}

fn group_thousands(amount: f64, decimal_places: usize) -> String {
    let fixed = format!("{amount:.decimal_places$}");
    let (integer, fraction) = match fixed.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (fixed.as_str(), None),
    };
    let mut grouped = String::with_capacity(fixed.len() + integer.len() / 3);
    for (position, digit) in integer.chars().enumerate() {
        if position > 0 && (integer.len() - position) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if let Some(fraction) = fraction {
        grouped.push('.');
        grouped.push_str(fraction);
    }
    grouped
}
