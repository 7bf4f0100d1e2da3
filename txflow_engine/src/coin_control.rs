use std::collections::BTreeSet;
use txflow_protocol::Utxo;

/// Manually chosen spendable outputs. Every method returns `true` when the selection that the
/// next proposal will carry has changed.
#[derive(Debug, Default, Clone)]
pub struct CoinControl {
    enabled: bool,
    selected: BTreeSet<String>,
    spendable: Option<BTreeSet<String>>,
}

impl CoinControl {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn selected(&self) -> &BTreeSet<String> {
        &self.selected
    }

    /// Turning the feature on or off always starts from an empty selection, i.e. from the
    /// backend's own input selection.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        if self.enabled == enabled {
            return false;
        }
        self.enabled = enabled;
        self.selected.clear();
        true
    }

    pub fn set_selection(&mut self, ids: BTreeSet<String>) -> bool {
        if !self.enabled {
            return false;
        }
        let ids: BTreeSet<String> = ids.into_iter().filter(|id| self.is_spendable(id)).collect();
        if ids == self.selected {
            return false;
        }
        self.selected = ids;
        true
    }

    pub fn toggle(&mut self, id: &str) -> bool {
        if !self.enabled {
            return false;
        }
        if self.selected.remove(id) {
            return true;
        }
        if !self.is_spendable(id) {
            return false;
        }
        self.selected.insert(id.to_string());
        true
    }

    pub fn clear(&mut self) -> bool {
        let had_any = !self.selected.is_empty();
        self.selected.clear();
        had_any
    }

    /// Records the current spendable set and drops selected outpoints that left it.
    pub fn set_spendable(&mut self, utxos: &[Utxo]) -> bool {
        let spendable: BTreeSet<String> = utxos.iter().map(|u| u.out_point.clone()).collect();
        let before = self.selected.len();
        self.selected.retain(|id| spendable.contains(id));
        self.spendable = Some(spendable);
        self.selected.len() != before
    }

    fn is_spendable(&self, id: &str) -> bool {
        self.spendable.as_ref().map_or(true, |s| s.contains(id))
    }
}
