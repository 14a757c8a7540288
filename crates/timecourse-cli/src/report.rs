use std::io::Write;

use tabled::{
    builder::Builder,
    settings::{Style, object::Rows, style::LineText, width::MinWidth},
};
use timecourse_core::{SourceRecord, SubjectOutcome};

use crate::error::{CliError, CliResult};

#[derive(Debug, Clone, Default)]
pub struct QaOptions {
    /// Channel to show; first channel of each source when unset.
    pub channel: Option<String>,
    /// Cap on rendered rows per source; 0 renders all.
    pub max_rows: usize,
}

fn render_table(title: &str, columns: &[String], rows: &[Vec<String>]) -> String {
    if columns.is_empty() {
        return String::new();
    }

    const TITLE_OFFSET: usize = 2;
    let min_width = TITLE_OFFSET + title.len() + 4;

    let mut builder = Builder::default();
    builder.push_record(columns);
    for row in rows {
        builder.push_record(row);
    }

    let mut table = builder.build();
    table.with(Style::rounded());
    table.with(MinWidth::new(min_width));
    table.with(LineText::new(title, Rows::first()).offset(TITLE_OFFSET));
    table.with(MinWidth::new(min_width));
    table.to_string()
}

fn fmt_value(v: Option<f64>) -> String {
    match v {
        Some(x) => format!("{x:.4}"),
        None => "NA".to_string(),
    }
}

/// Pick the representative channel for `record`.
pub fn qa_channel<'a>(
    record: &'a SourceRecord,
    requested: Option<&'a str>,
) -> CliResult<&'a str> {
    match requested {
        Some(name) if record.original.channel(name).is_some() => Ok(name),
        Some(name) => Err(CliError::UnknownQaChannel {
            channel: name.to_string(),
            source_file: record.source.display().to_string(),
        }),
        None => record
            .original
            .channel_names()
            .next()
            .ok_or_else(|| CliError::UnknownQaChannel {
                channel: "<first>".to_string(),
                source_file: record.source.display().to_string(),
            }),
    }
}

/// Original-vs-resampled listing for one channel of one source.
pub fn render_source_report(record: &SourceRecord, channel: &str, max_rows: usize) -> String {
    let resampled = &record.resampled;
    let table = resampled.table();
    let interval = table.sampling_interval();

    let mut columns = vec!["t".to_string()];
    if interval.is_some() {
        columns.push("time_s".to_string());
    }
    columns.extend(["kind".to_string(), "original".to_string(), channel.to_string()]);

    let original = record.original.channel(channel).map(|c| c.values());
    let values = table.channel(channel).map(|c| c.values()).unwrap_or(&[]);

    let limit = if max_rows == 0 { values.len() } else { max_rows };
    let rows: Vec<Vec<String>> = values
        .iter()
        .enumerate()
        .take(limit)
        .map(|(i, v)| {
            let mut row = vec![i.to_string()];
            if let Some(dt) = interval {
                row.push(format!("{:.2}", i as f64 * dt));
            }
            match resampled.source_index(i) {
                Some(src) => {
                    row.push("orig".to_string());
                    row.push(fmt_value(original.and_then(|o| o.get(src).copied().flatten())));
                }
                None => {
                    row.push("mid".to_string());
                    row.push(String::new());
                }
            }
            row.push(fmt_value(*v));
            row
        })
        .collect();

    let title = format!("{} ({})", record.label, channel);
    let mut rendered = render_table(&title, &columns, &rows);
    if limit < values.len() {
        rendered.push_str(&format!("\n({} more rows)", values.len() - limit));
    }
    rendered
}

/// One line per source: label, shape change and output path.
pub fn write_batch_summary<W: Write>(records: &[SourceRecord], out: &mut W) -> CliResult<()> {
    let columns: Vec<String> = ["label", "channels", "timepoints", "output"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            vec![
                r.label.to_string(),
                r.original.n_channels().to_string(),
                format!(
                    "{} -> {}",
                    r.original.n_timepoints(),
                    r.resampled.table().n_timepoints()
                ),
                r.output.display().to_string(),
            ]
        })
        .collect();

    writeln!(out, "{}", render_table("Resampled", &columns, &rows))
        .map_err(|source| CliError::Output { source })
}

/// QA listings for every record.
pub fn write_qa_reports<W: Write>(
    records: &[SourceRecord],
    opts: &QaOptions,
    out: &mut W,
) -> CliResult<()> {
    for record in records {
        let channel = qa_channel(record, opts.channel.as_deref())?;
        writeln!(out, "{}", render_source_report(record, channel, opts.max_rows))
            .map_err(|source| CliError::Output { source })?;
    }
    Ok(())
}

/// Per-subject outcome table for `run-subjects`.
pub fn write_subject_outcomes<W: Write>(
    outcomes: &[SubjectOutcome],
    out: &mut W,
) -> CliResult<()> {
    let columns: Vec<String> = ["subject", "status", "detail"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let rows: Vec<Vec<String>> = outcomes
        .iter()
        .map(|o| match o {
            SubjectOutcome::Skipped { subject, marker } => vec![
                subject.clone(),
                "skipped".to_string(),
                format!("marker {}", marker.display()),
            ],
            SubjectOutcome::Succeeded {
                subject, relocated, ..
            } => vec![
                subject.clone(),
                "ok".to_string(),
                format!("{} artifact(s) relocated", relocated.len()),
            ],
            SubjectOutcome::Failed {
                subject,
                log,
                error,
            } => vec![
                subject.clone(),
                "FAILED".to_string(),
                format!("{error} (log: {})", log.display()),
            ],
        })
        .collect();

    writeln!(out, "{}", render_table("Subjects", &columns, &rows))
        .map_err(|source| CliError::Output { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use timecourse_core::{Channel, LabelPattern, TimeSeriesTable, resample};

    fn record() -> SourceRecord {
        let original = TimeSeriesTable::new(vec![
            Channel::from_values("Left-Amygdala", &[10.0, 20.0, 30.0]),
            Channel::from_values("Right-Amygdala", &[1.0, 2.0, 3.0]),
        ])
        .unwrap()
        .with_sampling_interval(2.0)
        .unwrap();
        let resampled = resample(&original).unwrap();
        let label = LabelPattern::default()
            .parse(&PathBuf::from("timecourses-run01_timeseries.csv"))
            .unwrap();
        SourceRecord {
            label,
            source: PathBuf::from("timecourses-run01_timeseries.csv"),
            output: PathBuf::from("out/timecourses-run01.tsv"),
            original,
            resampled,
        }
    }

    #[test]
    fn qa_channel_defaults_to_first() {
        let r = record();
        assert_eq!(qa_channel(&r, None).unwrap(), "Left-Amygdala");
        assert_eq!(
            qa_channel(&r, Some("Right-Amygdala")).unwrap(),
            "Right-Amygdala"
        );
        assert!(qa_channel(&r, Some("Nope")).is_err());
    }

    #[test]
    fn source_report_marks_midpoints() {
        let rendered = render_source_report(&record(), "Left-Amygdala", 0);
        assert!(rendered.contains("run01 (Left-Amygdala)"));
        assert!(rendered.contains("15.0000"));
        assert!(rendered.contains("mid"));
        assert!(rendered.contains("time_s"));
        assert!(rendered.contains("4.00"));
    }

    #[test]
    fn source_report_truncates() {
        let rendered = render_source_report(&record(), "Left-Amygdala", 2);
        assert!(rendered.contains("(3 more rows)"));
    }

    #[test]
    fn batch_summary_lists_shapes() {
        let mut buf = Vec::new();
        write_batch_summary(&[record()], &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("3 -> 5"));
        assert!(text.contains("timecourses-run01.tsv"));
    }
}
