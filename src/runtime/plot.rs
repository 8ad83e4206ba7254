//! Consumer-side plot store: merges repeated plot events by id.

use super::events::PlotEvent;

/// Most recent records kept per plot.
pub const PLOT_HISTORY_CAP: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct PlotBoard {
    plots: Vec<PlotEvent>,
}

impl PlotBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// A known id takes the later event's descriptive fields and gains its
    /// records; new ids are appended in first-seen order.
    pub fn merge(&mut self, event: PlotEvent) {
        match self.plots.iter_mut().find(|p| p.id == event.id) {
            Some(existing) => {
                let mut data = std::mem::take(&mut existing.data);
                data.extend(event.data);
                if data.len() > PLOT_HISTORY_CAP {
                    data.drain(..data.len() - PLOT_HISTORY_CAP);
                }
                *existing = PlotEvent { data, ..event };
            }
            None => {
                let mut event = event;
                if event.data.len() > PLOT_HISTORY_CAP {
                    event.data.drain(..event.data.len() - PLOT_HISTORY_CAP);
                }
                self.plots.push(event);
            }
        }
    }

    pub fn plots(&self) -> &[PlotEvent] {
        &self.plots
    }

    pub fn get(&self, id: &str) -> Option<&PlotEvent> {
        self.plots.iter().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.plots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plots.is_empty()
    }

    pub fn clear(&mut self) {
        self.plots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::events::{PlotKind, PlotSeries};
    use serde_json::json;

    fn plot(id: &str, kind: PlotKind, data: Vec<serde_json::Value>) -> PlotEvent {
        PlotEvent {
            id: id.to_string(),
            title: id.to_string(),
            x_axis_key: "step".to_string(),
            y_axis_label: None,
            kind,
            series: vec![PlotSeries {
                key: "loss".to_string(),
                color: "#f00".to_string(),
                name: None,
            }],
            data,
        }
    }

    #[test]
    fn same_id_concatenates_data() {
        let mut board = PlotBoard::new();
        board.merge(plot("Loss", PlotKind::Line, vec![json!({"step": 0, "loss": 1.0})]));
        board.merge(plot("Loss", PlotKind::Bar, vec![json!({"step": 1, "loss": 0.5})]));
        assert_eq!(board.len(), 1);
        let merged = board.get("Loss").unwrap();
        assert_eq!(merged.data.len(), 2);
        assert_eq!(merged.data[1]["step"], 1);
        assert_eq!(merged.kind, PlotKind::Bar);
    }

    #[test]
    fn new_ids_keep_first_seen_order() {
        let mut board = PlotBoard::new();
        board.merge(plot("B", PlotKind::Line, vec![]));
        board.merge(plot("A", PlotKind::Line, vec![]));
        board.merge(plot("B", PlotKind::Line, vec![json!({"step": 2})]));
        let ids: Vec<&str> = board.plots().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["B", "A"]);
    }

    #[test]
    fn history_is_capped_to_latest_records() {
        let mut board = PlotBoard::new();
        for step in 0..150 {
            board.merge(plot("Loss", PlotKind::Line, vec![json!({ "step": step })]));
        }
        let merged = board.get("Loss").unwrap();
        assert_eq!(merged.data.len(), PLOT_HISTORY_CAP);
        assert_eq!(merged.data[0]["step"], 50);
        assert_eq!(merged.data[99]["step"], 149);
    }
}
