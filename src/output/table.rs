//! Summary tables for CLI output.

use colored::Colorize;
use tabled::Table;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::k8s::pdb::DrainBlocker;
use crate::rolling::{GroupStatus, InstanceState, RollingUpdateReport, Snapshot};

const GROUP_HEADERS: [&str; 6] = ["NAME", "STATUS", "NEEDUPDATE", "READY", "MIN", "MAX"];

/// Rows of the instance group table, NODES included when the cluster was reachable.
fn group_rows(snapshot: &Snapshot) -> Vec<Vec<String>> {
    snapshot
        .groups()
        .iter()
        .map(|g| {
            let status = match g.status() {
                GroupStatus::Ready => g.status().to_string().green().to_string(),
                GroupStatus::NeedsUpdate => g.status().to_string().yellow().to_string(),
            };
            let mut row = vec![
                g.name().to_string(),
                status,
                g.need_update.len().to_string(),
                g.ready.len().to_string(),
                g.min_size.to_string(),
                g.max_size.to_string(),
            ];
            if snapshot.cluster_reachable() {
                row.push(g.node_count().to_string());
            }
            row
        })
        .collect()
}

/// Print the per-group status table.
pub fn print_group_table(snapshot: &Snapshot) {
    if snapshot.groups().is_empty() {
        println!("No instance groups found.");
        return;
    }

    let mut builder = Builder::default();
    let mut headers: Vec<String> = GROUP_HEADERS.iter().map(|h| h.to_string()).collect();
    if snapshot.cluster_reachable() {
        headers.push("NODES".to_string());
    }
    builder.push_record(headers);
    for row in group_rows(snapshot) {
        builder.push_record(row);
    }

    let mut table = builder.build();
    apply_table_style(&mut table);
    println!("{}", table);
}

/// Print PodDisruptionBudgets that will refuse evictions.
pub fn print_drain_blockers(blockers: &[DrainBlocker]) {
    if blockers.is_empty() {
        return;
    }

    println!();
    println!(
        "{} {} PodDisruptionBudget(s) currently allow no disruption:",
        "⚠".yellow(),
        blockers.len()
    );
    for b in blockers {
        println!("  {}/{}: {}", b.namespace, b.name, b.reason().dimmed());
    }
}

/// Print what the run did and how it ended.
pub fn print_outcome(report: &RollingUpdateReport) {
    println!();

    if !report.instances.is_empty() {
        let mut builder = Builder::default();
        builder.push_record(["GROUP", "#", "INSTANCE", "NODE", "STATE", "WARNINGS"]);
        for r in &report.instances {
            let state = match r.state {
                InstanceState::Done => r.state.to_string().green().to_string(),
                InstanceState::Failed => r.state.to_string().red().to_string(),
                _ => r.state.to_string(),
            };
            builder.push_record([
                r.group.clone(),
                r.position.to_string(),
                r.instance_id.clone(),
                r.node.clone().unwrap_or_else(|| "-".to_string()),
                state,
                r.warnings.len().to_string(),
            ]);
        }
        let mut table = builder.build();
        apply_table_style(&mut table);
        println!("{}", table);
        println!();
    }

    match &report.failure {
        None => println!(
            "{} Rolling update completed: {} instance(s) replaced",
            "✓".green(),
            report.completed()
        ),
        Some(f) => {
            println!(
                "{} Rolling update stopped at instance group {}, instance #{} ({}) while {}",
                "✗".red(),
                f.group.bold(),
                f.position,
                f.instance_id,
                f.state
            );
            println!("  {}", f.error.to_string().red());
            println!(
                "  Re-run with {} to resume",
                format!("--instance-group {}", f.group).bold()
            );
        }
    }
}

fn apply_table_style(table: &mut Table) {
    use tabled::settings::object::Columns;
    use tabled::settings::themes::Theme;
    use tabled::settings::{Modify, Padding};

    let mut theme = Theme::from_style(Style::empty());
    theme.remove_horizontal_lines();
    table.with(theme);
    table.with(Modify::new(Columns::new(..)).with(Padding::new(0, 2, 0, 0)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{InstanceGroup, InstanceGroupRole};
    use crate::k8s::NodeRole;
    use crate::rolling::Selection;
    use crate::testing::{cloud_group, node_for};

    fn selection() -> Selection {
        let all = vec![
            InstanceGroup::new("masters", InstanceGroupRole::Master),
            InstanceGroup::new("nodes", InstanceGroupRole::Node),
        ];
        Selection::new(&all, &[]).unwrap()
    }

    #[test]
    fn test_group_rows_cloud_only() {
        let mut nodes = cloud_group("nodes", &["i-1"], &["i-2", "i-3"]);
        nodes.min_size = 2;
        nodes.max_size = 4;
        let snapshot = Snapshot::build(&selection(), vec![nodes], None);

        let rows = group_rows(&snapshot);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.len(), 6);
        assert_eq!(row[0], "nodes");
        assert!(row[1].contains("NeedsUpdate"));
        assert_eq!(&row[2..], &["1", "2", "2", "4"]);
    }

    #[test]
    fn test_group_rows_with_nodes_column() {
        let cluster_nodes = vec![node_for("i-m1", NodeRole::Master)];
        let snapshot = Snapshot::build(
            &selection(),
            vec![cloud_group("masters", &[], &["i-m1", "i-m2"])],
            Some(&cluster_nodes),
        );

        let rows = group_rows(&snapshot);
        assert_eq!(rows[0].len(), 7);
        assert!(rows[0][1].contains("Ready"));
        assert_eq!(rows[0][6], "1");
    }
}
