use std::collections::HashMap;

use portfolio_stream::CompanyList;

use crate::error::RunnerError;

/// NIFTY 50 snapshot served when no directory file overrides it.
const NIFTY50: [&str; 50] = [
    "ADANIENT", "ADANIPORTS", "APOLLOHOSP", "ASIANPAINT", "AXISBANK", "BAJAJ-AUTO", "BAJFINANCE",
    "BAJAJFINSV", "BEL", "BHARTIARTL", "BPCL", "BRITANNIA", "CIPLA", "COALINDIA", "DRREDDY",
    "EICHERMOT", "GRASIM", "HCLTECH", "HDFCBANK", "HDFCLIFE", "HEROMOTOCO", "HINDALCO",
    "HINDUNILVR", "ICICIBANK", "INDUSINDBK", "INFY", "ITC", "JSWSTEEL", "KOTAKBANK", "LT", "M&M",
    "MARUTI", "NESTLEIND", "NTPC", "ONGC", "POWERGRID", "RELIANCE", "SBILIFE", "SBIN",
    "SHRIRAMFIN", "SUNPHARMA", "TATACONSUM", "TATAMOTORS", "TATASTEEL", "TCS", "TECHM", "TITAN",
    "TRENT", "ULTRACEMCO", "WIPRO",
];

/// Constituents served by `GET /companies/{category}`.
#[derive(Clone, Debug, Default)]
pub struct CompanyDirectory {
    lists: HashMap<CompanyList, Vec<String>>,
}

impl CompanyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in lists; only NIFTY 50 ships with the runner.
    pub fn builtin() -> Self {
        Self::new().with_list(CompanyList::Nifty50, NIFTY50)
    }

    /// Lists in `other` replace same-named lists in `self`.
    pub fn merge(mut self, other: CompanyDirectory) -> Self {
        self.lists.extend(other.lists);
        self
    }

    pub fn with_list<I, S>(mut self, list: CompanyList, companies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lists
            .insert(list, companies.into_iter().map(Into::into).collect());
        self
    }

    /// Parses `{"nifty50": ["RELIANCE", ...], ...}`.
    pub fn from_json(text: &str) -> Result<Self, RunnerError> {
        let raw: HashMap<String, Vec<String>> = serde_json::from_str(text)
            .map_err(|e| RunnerError::Validation(format!("invalid company directory: {e}")))?;
        let mut directory = Self::new();
        for (category, companies) in raw {
            let list = category
                .parse::<CompanyList>()
                .map_err(|_| RunnerError::UnknownCategory(category.clone()))?;
            directory.lists.insert(list, companies);
        }
        Ok(directory)
    }

    pub fn get(&self, list: CompanyList) -> Option<&[String]> {
        self.lists.get(&list).map(Vec::as_slice)
    }

    /// Like `get`, but a missing list is a `ListNotLoaded` error.
    pub fn require(&self, list: CompanyList) -> Result<&[String], RunnerError> {
        self.get(list)
            .ok_or_else(|| RunnerError::ListNotLoaded(list.to_string()))
    }
}
