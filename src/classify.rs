//! Keyword classification of staged dimension names.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationType {
    Online,
    Transport,
    Physical,
    Unknown,
}

impl LocationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "Online",
            Self::Transport => "Transport",
            Self::Physical => "Physical",
            Self::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentType {
    Card,
    DigitalWallet,
    TransitCard,
    BankTransfer,
    Other,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "Card",
            Self::DigitalWallet => "Digital Wallet",
            Self::TransitCard => "Transit Card",
            Self::BankTransfer => "Bank Transfer",
            Self::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CategoryGroup {
    Essential,
    Discretionary,
    Transport,
    Healthcare,
    Education,
    Other,
}

impl CategoryGroup {
    pub const ALL: [CategoryGroup; 6] = [
        Self::Essential,
        Self::Discretionary,
        Self::Transport,
        Self::Healthcare,
        Self::Education,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Essential => "Essential",
            Self::Discretionary => "Discretionary",
            Self::Transport => "Transport",
            Self::Healthcare => "Healthcare",
            Self::Education => "Education",
            Self::Other => "Other",
        }
    }

    /// Read back a stored group name; anything unrecognised is `Other`.
    pub fn from_name(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(name.trim()))
            .unwrap_or(Self::Other)
    }
}

const ONLINE_KEYWORDS: &[&str] = &[
    "shopee", "lazada", "zalora", "amazon", "grab", "foodpanda", "udemy", "netflix", "spotify",
    "online", "taobao", ".com", "web",
];
const TRANSPORT_KEYWORDS: &[&str] = &["mrt", "bus", "taxi", "grab", "gojek", "station", "interchange"];
const PHYSICAL_KEYWORDS: &[&str] = &["mall", "restaurant", "cafe", "clinic", "hospital", "court", "market"];

const CARD_KEYWORDS: &[&str] = &["card", "visa", "mastercard", "amex"];
const WALLET_KEYWORDS: &[&str] = &["pay", "wallet", "apple", "google", "grab"];
const TRANSIT_KEYWORDS: &[&str] = &["ez-link", "nets", "flashpay"];
const BANK_KEYWORDS: &[&str] = &["bank", "transfer", "giro"];

fn contains_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| haystack.contains(k))
}

pub fn classify_location_type(name: &str) -> LocationType {
    let lower = name.trim().to_lowercase();
    if lower.is_empty() {
        return LocationType::Unknown;
    }
    if contains_any(&lower, ONLINE_KEYWORDS) {
        LocationType::Online
    } else if contains_any(&lower, TRANSPORT_KEYWORDS) {
        LocationType::Transport
    } else if contains_any(&lower, PHYSICAL_KEYWORDS) {
        LocationType::Physical
    } else {
        LocationType::Physical
    }
}

pub fn classify_payment_type(name: &str) -> PaymentType {
    let lower = name.trim().to_lowercase();
    if lower.is_empty() {
        return PaymentType::Other;
    }
    let rules: [(&[&str], PaymentType); 4] = [
        (CARD_KEYWORDS, PaymentType::Card),
        (WALLET_KEYWORDS, PaymentType::DigitalWallet),
        (TRANSIT_KEYWORDS, PaymentType::TransitCard),
        (BANK_KEYWORDS, PaymentType::BankTransfer),
    ];
    rules
        .into_iter()
        .find(|(keywords, _)| contains_any(&lower, keywords))
        .map(|(_, t)| t)
        .unwrap_or(PaymentType::Other)
}

pub fn classify_category_group(name: &str) -> CategoryGroup {
    match name.trim().to_lowercase().as_str() {
        "groceries" | "food" | "utilities" => CategoryGroup::Essential,
        "shopping" | "entertainment" | "dining" => CategoryGroup::Discretionary,
        "transport" | "transportation" => CategoryGroup::Transport,
        "healthcare" | "medical" | "health" => CategoryGroup::Healthcare,
        "education" | "learning" | "books" => CategoryGroup::Education,
        _ => CategoryGroup::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_types() {
        assert_eq!(classify_location_type(""), LocationType::Unknown);
        assert_eq!(classify_location_type("  "), LocationType::Unknown);
        assert_eq!(classify_location_type("Shopee"), LocationType::Online);
        assert_eq!(classify_location_type("www.example.com"), LocationType::Online);
        // grab is an online keyword first
        assert_eq!(classify_location_type("Grab Ride"), LocationType::Online);
        assert_eq!(classify_location_type("Bishan MRT"), LocationType::Transport);
        assert_eq!(classify_location_type("Bedok Interchange"), LocationType::Transport);
        assert_eq!(classify_location_type("Lau Pa Sat Food Court"), LocationType::Physical);
        assert_eq!(classify_location_type("Uncle's Shop"), LocationType::Physical);
    }

    #[test]
    fn test_payment_types() {
        assert_eq!(classify_payment_type(""), PaymentType::Other);
        assert_eq!(classify_payment_type("Credit Card"), PaymentType::Card);
        assert_eq!(classify_payment_type("VISA"), PaymentType::Card);
        assert_eq!(classify_payment_type("PayNow"), PaymentType::DigitalWallet);
        assert_eq!(classify_payment_type("Apple Pay"), PaymentType::DigitalWallet);
        assert_eq!(classify_payment_type("EZ-Link"), PaymentType::TransitCard);
        assert_eq!(classify_payment_type("NETS"), PaymentType::TransitCard);
        assert_eq!(classify_payment_type("GIRO"), PaymentType::BankTransfer);
        assert_eq!(classify_payment_type("Cash"), PaymentType::Other);
        assert_eq!(PaymentType::DigitalWallet.as_str(), "Digital Wallet");
    }

    #[test]
    fn test_payment_first_match_wins() {
        // "card" is checked before "bank"
        assert_eq!(classify_payment_type("Bank Card"), PaymentType::Card);
    }

    #[test]
    fn test_category_groups_are_exact() {
        assert_eq!(classify_category_group(" Groceries "), CategoryGroup::Essential);
        assert_eq!(classify_category_group("DINING"), CategoryGroup::Discretionary);
        assert_eq!(classify_category_group("Transportation"), CategoryGroup::Transport);
        assert_eq!(classify_category_group("Medical"), CategoryGroup::Healthcare);
        assert_eq!(classify_category_group("books"), CategoryGroup::Education);
        assert_eq!(classify_category_group("Food & Drinks"), CategoryGroup::Other);
        assert_eq!(classify_category_group(""), CategoryGroup::Other);
    }

    #[test]
    fn test_group_from_name() {
        assert_eq!(CategoryGroup::from_name("essential"), CategoryGroup::Essential);
        assert_eq!(CategoryGroup::from_name("whatever"), CategoryGroup::Other);
    }
}
