//! Contact-exchange detection for chat text.
//!
//! Two passes over the same string. The live pass runs on every keystroke and
//! favours recall: it only drives a transient banner. The final pass runs once
//! when a message is dispatched and favours precision, because its result is
//! stored on the message and may add a system warning to the thread.

use std::sync::LazyLock;

use regex::Regex;

use mercat_types::models::RiskSignal;

/// Nine contiguous digits, the length of a national mobile number.
const DIGIT_RUN_PATTERN: &str = r"[0-9]{9}";

/// Spanish mobile number: optional `+34`/`0034`/`34` prefix, a leading 6 or 7,
/// then eight more digits. Any digit may be preceded by whitespace or hyphens.
pub const SPANISH_MOBILE_PATTERN: &str = r"(?i)(?:\+34|0034|34)?[\s-]*[67][\s-]*(?:[0-9][\s-]*){8}";

/// `local@domain.tld` with a 2-4 letter final segment.
pub const EMAIL_PATTERN: &str = r"(?i)[\w.-]+@(?:[\w-]+\.)+[a-z]{2,4}";

static DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DIGIT_RUN_PATTERN).expect("digit-run pattern is valid"));

static SPANISH_MOBILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(SPANISH_MOBILE_PATTERN).expect("phone pattern is valid"));

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(EMAIL_PATTERN).expect("email pattern is valid"));

static DEFAULT_SCANNER: LazyLock<SafetyScanner> = LazyLock::new(SafetyScanner::default);

/// Compiled rules for the final pass.
#[derive(Debug, Clone)]
pub struct PatternSet {
    phone: Regex,
    email: Regex,
}

impl PatternSet {
    pub fn new(phone: &str, email: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            phone: Regex::new(phone)?,
            email: Regex::new(email)?,
        })
    }

    pub fn phone(&self) -> &Regex {
        &self.phone
    }

    pub fn email(&self) -> &Regex {
        &self.email
    }
}

impl Default for PatternSet {
    fn default() -> Self {
        Self {
            phone: SPANISH_MOBILE.clone(),
            email: EMAIL.clone(),
        }
    }
}

/// Stateless classifier. Cheap to clone; every method is pure and total.
#[derive(Debug, Clone)]
pub struct SafetyScanner {
    digit_run: Regex,
    patterns: PatternSet,
}

impl SafetyScanner {
    pub fn new(patterns: PatternSet) -> Self {
        Self {
            digit_run: DIGIT_RUN.clone(),
            patterns,
        }
    }

    /// Default rules with the phone rule replaced by `pattern`, for
    /// deployments outside the Spanish numbering plan.
    pub fn with_phone_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::new(PatternSet::new(pattern, EMAIL_PATTERN)?))
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    /// Per-keystroke check: a nine-digit run or any `@`.
    pub fn scan_live(&self, text: &str) -> bool {
        text.contains('@') || self.digit_run.is_match(text)
    }

    /// At-send check: a phone number or an email address anywhere in `text`.
    pub fn scan_final(&self, text: &str) -> bool {
        self.patterns.phone.is_match(text) || self.patterns.email.is_match(text)
    }

    pub fn scan(&self, text: &str) -> RiskSignal {
        RiskSignal {
            live: self.scan_live(text),
            final_: self.scan_final(text),
        }
    }
}

impl Default for SafetyScanner {
    fn default() -> Self {
        Self::new(PatternSet::default())
    }
}

/// [`SafetyScanner::scan_live`] with the default rules.
pub fn scan_live(text: &str) -> bool {
    DEFAULT_SCANNER.scan_live(text)
}

/// [`SafetyScanner::scan_final`] with the default rules.
pub fn scan_final(text: &str) -> bool {
    DEFAULT_SCANNER.scan_final(text)
}
