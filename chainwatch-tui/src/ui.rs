use chainwatch_engine::{
    ConnectionPhase, EngineView, ExpirySummary, LegMetrics, Record, Side, TimeSlot,
};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Cell, Chart, Dataset, GraphType, Paragraph, Row, Table},
};
use rust_decimal::Decimal;
use smol_str::SmolStr;

/// Everything one frame draws, collected before the draw call.
pub struct Screen {
    pub view: EngineView,
    pub expiry: Option<SmolStr>,
    pub strike: Option<Decimal>,
    pub slots: Vec<TimeSlot>,
    pub latest_only: bool,
    pub sort_by_pcr: bool,
}

pub fn render(f: &mut Frame, screen: &Screen) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Min(8),
            Constraint::Length(1),
        ])
        .split(f.area());

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(chunks[2]);

    render_status(f, screen, chunks[0]);
    render_summaries(f, &screen.view.summaries, chunks[1]);
    render_chain(f, screen, body[0]);
    render_chart(f, screen, body[1]);
    render_help(f, screen, chunks[3]);
}

fn phase_color(phase: ConnectionPhase) -> Color {
    match phase {
        ConnectionPhase::Connected | ConnectionPhase::Receiving => Color::Green,
        ConnectionPhase::Connecting => Color::Yellow,
        ConnectionPhase::Error => Color::LightRed,
        ConnectionPhase::Failed => Color::Red,
        ConnectionPhase::Closed => Color::DarkGray,
    }
}

fn render_status(f: &mut Frame, screen: &Screen, area: Rect) {
    let view = &screen.view;
    let connection = &view.connection;

    let mut spans = vec![
        Span::styled(
            format!(" {} ", connection.phase.to_string().to_uppercase()),
            Style::default()
                .fg(Color::Black)
                .bg(phase_color(connection.phase))
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!("  retry {}", connection.retry_count)),
    ];

    if let Some(updated) = view.meta.latest_timestamp {
        spans.push(Span::raw(format!("  updated {}", updated.format("%d-%b %H:%M:%S"))));
    }
    if let Some(underlying) = view.meta.underlying_value {
        spans.push(Span::styled(
            format!("  spot {underlying:.2}"),
            Style::default().fg(Color::Cyan),
        ));
    }
    spans.push(Span::styled(
        format!("  {} snapshots / {} records", view.meta.snapshots, view.meta.records),
        Style::default().fg(Color::DarkGray),
    ));

    let detail = match (&view.notice, &connection.last_error) {
        (Some(notice), _) => Span::styled(
            format!("  {}", notice.error),
            Style::default().fg(if notice.is_terminal() { Color::Red } else { Color::Yellow }),
        ),
        (None, Some(error)) => Span::styled(format!("  {error}"), Style::default().fg(Color::LightRed)),
        (None, None) => Span::raw(""),
    };

    let paragraph = Paragraph::new(vec![Line::from(spans), Line::from(detail)]).block(
        Block::default()
            .title(" CHAINWATCH ")
            .borders(Borders::TOP | Borders::LEFT | Borders::RIGHT),
    );
    f.render_widget(paragraph, area);
}

fn render_summaries(f: &mut Frame, summaries: &[ExpirySummary], area: Rect) {
    let header = Row::new([
        "EXPIRY", "CE OI", "PE OI", "CE ΔOI", "PE ΔOI", "CE VOL", "PE VOL", "PCR", "ΔPCR",
    ])
    .style(Style::default().add_modifier(Modifier::BOLD));

    let rows = summaries.iter().map(|summary| {
        Row::new([
            Cell::from(summary.expiry.to_string()),
            Cell::from(summary.call.open_interest.to_string()),
            Cell::from(summary.put.open_interest.to_string()),
            Cell::from(summary.call.change_in_oi.to_string()),
            Cell::from(summary.put.change_in_oi.to_string()),
            Cell::from(summary.call.volume.to_string()),
            Cell::from(summary.put.volume.to_string()),
            Cell::from(summary.pcr().to_string()).style(Style::default().fg(Color::Cyan)),
            Cell::from(summary.intraday_pcr().to_string()),
        ])
    });

    let widths = [
        Constraint::Length(12),
        Constraint::Length(12),
        Constraint::Length(12),
        Constraint::Length(10),
        Constraint::Length(10),
        Constraint::Length(12),
        Constraint::Length(12),
        Constraint::Length(6),
        Constraint::Length(6),
    ];

    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().title(" SUMMARY ").borders(Borders::ALL));
    f.render_widget(table, area);
}

fn leg_cells(metrics: Option<&LegMetrics>, side: Side) -> Vec<Cell<'static>> {
    let Some(metrics) = metrics else {
        return vec![Cell::from("-"); 5];
    };

    let change_style = Style::default().fg(if metrics.change_in_oi >= 0 { Color::Green } else { Color::Red });
    let mut cells = vec![
        Cell::from(metrics.open_interest.to_string()),
        Cell::from(metrics.change_in_oi.to_string()).style(change_style),
        Cell::from(metrics.volume.to_string()),
        Cell::from(format!("{:.1}", metrics.implied_volatility)),
        Cell::from(format!("{:.2}", metrics.last_price)),
    ];
    // put columns mirror the call columns around the strike
    if side == Side::Put {
        cells.reverse();
    }
    cells
}

fn chain_row(record: &Record, selected: bool) -> Row<'static> {
    let mut cells = leg_cells(record.side(Side::Call), Side::Call);
    cells.push(
        Cell::from(record.strike.to_string())
            .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
    );
    cells.extend(leg_cells(record.side(Side::Put), Side::Put));
    cells.push(Cell::from(record.pcr().to_string()));
    cells.push(Cell::from(record.intraday_pcr().to_string()));
    cells.push(Cell::from(record.timestamp.format("%H:%M:%S").to_string()));

    let row = Row::new(cells);
    if selected {
        row.style(Style::default().bg(Color::DarkGray))
    } else {
        row
    }
}

fn render_chain(f: &mut Frame, screen: &Screen, area: Rect) {
    let header = Row::new([
        "CE OI", "CE ΔOI", "CE VOL", "CE IV", "CE LTP", "STRIKE", "PE LTP", "PE IV", "PE VOL",
        "PE ΔOI", "PE OI", "PCR", "ΔPCR", "TIME",
    ])
    .style(Style::default().add_modifier(Modifier::BOLD));

    let rows = screen
        .view
        .records
        .iter()
        .map(|record| chain_row(record, Some(record.strike) == screen.strike));

    let mut widths = vec![Constraint::Length(9); 14];
    widths[5] = Constraint::Length(10);

    let title = format!(
        " CHAIN {} {}{}",
        screen.expiry.as_deref().unwrap_or("-"),
        if screen.latest_only { "(latest) " } else { "(all) " },
        if screen.sort_by_pcr { "by PCR " } else { "" }
    );

    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().title(title).borders(Borders::ALL));
    f.render_widget(table, area);
}

/// Chart points for one side. Empty slots produce no point, leaving a gap.
fn series(slots: &[TimeSlot], oi: impl Fn(&TimeSlot) -> Option<u64>) -> Vec<(f64, f64)> {
    slots
        .iter()
        .enumerate()
        .filter_map(|(index, slot)| oi(slot).map(|value| (index as f64, value as f64)))
        .collect()
}

fn render_chart(f: &mut Frame, screen: &Screen, area: Rect) {
    let call = series(&screen.slots, |slot| slot.call_oi);
    let put = series(&screen.slots, |slot| slot.put_oi);

    let max_oi = call
        .iter()
        .chain(put.iter())
        .map(|(_, value)| *value)
        .fold(0.0_f64, f64::max);
    let y_max = if max_oi > 0.0 { max_oi * 1.1 } else { 1.0 };
    let x_max = screen.slots.len().saturating_sub(1).max(1) as f64;

    let x_labels: Vec<Line<'_>> = [
        screen.slots.first(),
        screen.slots.get(screen.slots.len() / 2),
        screen.slots.last(),
    ]
    .into_iter()
    .flatten()
    .map(|slot| Line::from(slot.label()))
    .collect();

    let datasets = vec![
        Dataset::default()
            .name("CE OI")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(Color::Green))
            .data(&call),
        Dataset::default()
            .name("PE OI")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(Color::Red))
            .data(&put),
    ];

    let title = match screen.strike {
        Some(strike) => format!(" OI {} @ {} ", screen.expiry.as_deref().unwrap_or("-"), strike),
        None => " OI ".to_string(),
    };

    let chart = Chart::new(datasets)
        .block(Block::default().title(title).borders(Borders::ALL))
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::DarkGray))
                .bounds([0.0, x_max])
                .labels(x_labels),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::DarkGray))
                .bounds([0.0, y_max])
                .labels(vec![
                    Line::from("0"),
                    Line::from(format!("{:.0}", y_max / 2.0)),
                    Line::from(format!("{y_max:.0}")),
                ]),
        );
    f.render_widget(chart, area);
}

fn render_help(f: &mut Frame, screen: &Screen, area: Rect) {
    let latest = if screen.latest_only { "all" } else { "latest" };
    let help = Paragraph::new(Line::from(vec![
        Span::styled(" q", Style::default().fg(Color::Yellow)),
        Span::raw(" quit  "),
        Span::styled("Tab", Style::default().fg(Color::Yellow)),
        Span::raw(" expiry  "),
        Span::styled("↑/↓", Style::default().fg(Color::Yellow)),
        Span::raw(" strike  "),
        Span::styled("l", Style::default().fg(Color::Yellow)),
        Span::raw(format!(" show {latest}  ")),
        Span::styled("p", Style::default().fg(Color::Yellow)),
        Span::raw(if screen.sort_by_pcr { " by strike  " } else { " by PCR  " }),
        Span::styled("r", Style::default().fg(Color::Yellow)),
        Span::raw(" rebuild"),
    ]));
    f.render_widget(help, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn slot(minute: u32, call_oi: Option<u64>, put_oi: Option<u64>) -> TimeSlot {
        TimeSlot {
            time: NaiveTime::from_hms_opt(9, minute, 0).unwrap(),
            underlying_value: None,
            call_oi,
            put_oi,
        }
    }

    #[test]
    fn test_series_leaves_gaps() {
        let slots = vec![
            slot(15, Some(100), None),
            slot(18, None, None),
            slot(21, Some(140), Some(90)),
        ];

        assert_eq!(
            series(&slots, |slot| slot.call_oi),
            vec![(0.0, 100.0), (2.0, 140.0)]
        );
        assert_eq!(series(&slots, |slot| slot.put_oi), vec![(2.0, 90.0)]);
    }
}
