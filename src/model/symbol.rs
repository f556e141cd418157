use serde::Deserialize;

/// One configured instrument of the tracked set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub token: String,
    pub exchange: String,
    #[serde(default)]
    pub name: String,
    /// Whether breakouts on this instrument produce signals. Instruments
    /// without the flag are still aggregated per session.
    #[serde(default = "default_breakout")]
    pub breakout: bool,
}

fn default_breakout() -> bool {
    true
}

#[derive(Debug, Clone, Default)]
pub struct SymbolRegistry {
    instruments: Vec<Instrument>,
}

impl SymbolRegistry {
    pub fn new(instruments: Vec<Instrument>) -> Self {
        let mut out: Vec<Instrument> = Vec::new();
        for mut inst in instruments {
            inst.symbol = inst.symbol.trim().to_ascii_uppercase();
            inst.token = inst.token.trim().to_string();
            if inst.symbol.is_empty() || out.iter().any(|v| v.symbol == inst.symbol) {
                continue;
            }
            out.push(inst);
        }
        Self { instruments: out }
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    /// Symbol first, token as fallback; the feed sometimes sends only one.
    pub fn resolve(&self, symbol: Option<&str>, token: Option<&str>) -> Option<&Instrument> {
        if let Some(sym) = symbol.map(str::trim).filter(|s| !s.is_empty()) {
            if let Some(found) = self
                .instruments
                .iter()
                .find(|i| i.symbol.eq_ignore_ascii_case(sym))
            {
                return Some(found);
            }
        }
        let token = token.map(str::trim).filter(|t| !t.is_empty())?;
        self.instruments.iter().find(|i| i.token == token)
    }

    pub fn tracked_symbols(&self) -> Vec<String> {
        self.instruments.iter().map(|i| i.symbol.clone()).collect()
    }

    pub fn breakout_symbols(&self) -> Vec<String> {
        self.instruments
            .iter()
            .filter(|i| i.breakout)
            .map(|i| i.symbol.clone())
            .collect()
    }

    pub fn reference_symbols(&self) -> Vec<String> {
        self.instruments
            .iter()
            .filter(|i| !i.breakout)
            .map(|i| i.symbol.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(symbol: &str, token: &str, breakout: bool) -> Instrument {
        Instrument {
            symbol: symbol.to_string(),
            token: token.to_string(),
            exchange: "NSE".to_string(),
            name: String::new(),
            breakout,
        }
    }

    #[test]
    fn resolves_by_symbol_then_token() {
        let reg = SymbolRegistry::new(vec![
            inst("nifty", "99926000", true),
            inst("NIFTY28AUG25FUT", "64103", false),
        ]);
        assert_eq!(reg.resolve(Some("Nifty"), None).unwrap().symbol, "NIFTY");
        assert_eq!(reg.resolve(None, Some("64103")).unwrap().symbol, "NIFTY28AUG25FUT");
        assert_eq!(reg.resolve(Some("TOKEN_1"), Some("99926000")).unwrap().symbol, "NIFTY");
        assert!(reg.resolve(Some("BANKNIFTY"), Some("1")).is_none());
        assert_eq!(reg.breakout_symbols(), vec!["NIFTY".to_string()]);
        assert_eq!(reg.reference_symbols(), vec!["NIFTY28AUG25FUT".to_string()]);
        assert_eq!(reg.tracked_symbols().len(), 2);
    }

    #[test]
    fn duplicates_and_blanks_are_dropped() {
        let reg = SymbolRegistry::new(vec![
            inst("NIFTY", "1", true),
            inst("nifty", "2", true),
            inst("  ", "3", true),
        ]);
        assert_eq!(reg.instruments().len(), 1);
        assert_eq!(reg.instruments()[0].token, "1");
    }
}
