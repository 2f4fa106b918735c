//! Computes, for a current snapshot relative to a previous manifest, the
//! per-file action plan (COPY, MOVE, NOOP), and threads generation counters
//! and chain rewrites through the declared restore-point window.
//!
//! This is the part of the system worth getting right: everything else is
//! glue connecting this algorithm's output to shell commands.

use std::collections::{HashMap, HashSet};

use crate::manifest::{Action, FileEntry, Manifest, TabletEntry};

/// `(tablet, filename)` - the planner's unit of bookkeeping.
pub type FileKey = (String, String);

fn is_compare_set(filename: &str) -> bool {
    filename.contains(".sst")
}

/// Per-tablet source paths discovered on the leader hosts for the current
/// snapshot, keyed by tablet UUID. Each path's basename becomes the
/// filename; the planner doesn't care about directory structure beyond that.
pub type CurrentTabletFiles = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, Default)]
pub struct DiffPlan {
    /// Whether any predecessor manifest in the chain needs to be rewritten
    /// and re-uploaded because a file was promoted out of it.
    pub write_previous_manifests: bool,
    /// Ancestor manifests (oldest last encountered first is irrelevant -
    /// callers re-upload whichever appear here) mutated in place by a
    /// promotion, keyed by their `manifest_location`.
    pub rewritten_ancestors: HashMap<String, Manifest>,
}

/// Runs the diff algorithm against `manifest.storage.tablet_ids`, which this
/// function populates in place. `previous_manifest` is `None` for a full
/// backup (every file becomes a fresh COPY).
///
/// `load_ancestor` is called to fetch a predecessor manifest by its
/// `manifest_location`, following `manifest_previous` chain pointers; it
/// returns `None` once the chain ends or isn't needed.
pub fn plan_diff<F>(
    manifest: &mut Manifest,
    current_tablet_files: &CurrentTabletFiles,
    previous_manifest: Option<&Manifest>,
    restore_points: u32,
    backup_location: &str,
    mut load_ancestor: F,
) -> DiffPlan
where
    F: FnMut(&str) -> Option<Manifest>,
{
    let mut plan = DiffPlan::default();

    for (tablet, paths) in current_tablet_files {
        let mut curr: HashMap<String, FileEntry> = HashMap::new();
        let mut compare_curr: HashSet<String> = HashSet::new();
        let mut copy_curr: HashSet<String> = HashSet::new();

        for path in paths {
            let filename = basename(path);
            let entry = FileEntry {
                filename: filename.clone(),
                generation: 1,
                src_location: path.clone(),
                action: Action::Copy,
            };
            if is_compare_set(&filename) {
                compare_curr.insert(filename.clone());
            } else {
                copy_curr.insert(filename.clone());
            }
            curr.insert(filename, entry);
        }

        let prev_files: HashMap<String, FileEntry> = previous_manifest
            .and_then(|m| m.storage.tablet_ids.get(tablet))
            .and_then(TabletEntry::files)
            .cloned()
            .unwrap_or_default();
        let compare_prev: HashSet<String> =
            prev_files.keys().filter(|f| is_compare_set(f)).cloned().collect();

        let both: HashSet<String> = compare_curr.intersection(&compare_prev).cloned().collect();
        let only_curr: HashSet<String> = compare_curr.difference(&compare_prev).cloned().collect();

        let mut planned: HashMap<String, FileEntry> = HashMap::new();

        for filename in only_curr.iter().chain(copy_curr.iter()) {
            let mut entry = curr.get(filename).expect("present in curr by construction").clone();
            entry.action = Action::Copy;
            planned.insert(filename.clone(), entry);
        }

        for filename in &both {
            let prev_entry = prev_files.get(filename).expect("present in prev by construction").clone();
            if prev_entry.generation + 1 > restore_points {
                let new_location = format!("{backup_location}/tablet-{tablet}/{filename}");
                promote_in_ancestors(previous_manifest, tablet, filename, &new_location, restore_points, &mut load_ancestor, &mut plan);
                planned.insert(
                    filename.clone(),
                    FileEntry { filename: filename.clone(), generation: 1, src_location: new_location, action: Action::Move },
                );
                plan.write_previous_manifests = true;
            } else {
                planned.insert(
                    filename.clone(),
                    FileEntry { filename: filename.clone(), generation: prev_entry.generation + 1, action: Action::Noop, ..prev_entry },
                );
            }
        }

        let tablet_entry = if !only_curr.is_empty() && both.is_empty() {
            TabletEntry::Directory
        } else {
            TabletEntry::Files(planned)
        };
        manifest.storage.tablet_ids.insert(tablet.clone(), tablet_entry);
    }

    plan
}

fn basename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Walks up the chain from `previous_manifest` via `manifest_previous`,
/// bounded by `restore_points` hops, rewriting every ancestor's entry for
/// `(tablet, filename)` to point at the file's new location and resetting
/// its generation to `restore_points - 1` so it continues to look valid
/// without immediately re-promoting.
///
/// Starts each hop from `plan.rewritten_ancestors`' copy of that ancestor
/// when one already exists, rather than a fresh clone of the manifest
/// `load_ancestor`/`previous_manifest` would hand back - otherwise an
/// earlier promotion in the same `plan_diff` run (a different tablet or
/// file sharing the same ancestor) would have its rewrite silently
/// overwritten by this call's fresh-cloned-and-reinserted copy.
#[allow(clippy::too_many_arguments)]
fn promote_in_ancestors<F>(
    previous_manifest: Option<&Manifest>,
    tablet: &str,
    filename: &str,
    new_location: &str,
    restore_points: u32,
    load_ancestor: &mut F,
    plan: &mut DiffPlan,
) where
    F: FnMut(&str) -> Option<Manifest>,
{
    let Some(previous_manifest) = previous_manifest else { return };
    let reset_generation = restore_points.saturating_sub(1);

    let mut location = previous_manifest.metadata.manifest_location.clone();
    let mut ancestor = plan.rewritten_ancestors.get(&location).cloned().unwrap_or_else(|| previous_manifest.clone());

    for _ in 0..restore_points {
        let mut touched = false;
        if let Some(tablet_entry) = ancestor.storage.tablet_ids.get_mut(tablet) {
            if let TabletEntry::Files(files) = tablet_entry {
                if let Some(entry) = files.get_mut(filename) {
                    entry.src_location = new_location.to_string();
                    entry.generation = reset_generation;
                    touched = true;
                }
            }
        }
        if touched {
            plan.rewritten_ancestors.insert(location.clone(), ancestor.clone());
        }

        let next_location = ancestor.metadata.manifest_previous.clone();
        if next_location.is_empty() {
            break;
        }
        let next_ancestor = match plan.rewritten_ancestors.get(&next_location) {
            Some(already_rewritten) => already_rewritten.clone(),
            None => match load_ancestor(&next_location) {
                Some(next) => next,
                None => break,
            },
        };
        location = next_location;
        ancestor = next_ancestor;
    }
}

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;
    use crate::manifest::Manifest;

    fn manifest_with_generation(tablet: &str, generation: u32) -> Manifest {
        let mut m = Manifest::new_full("s3://b/k-prev".into(), "s3".into(), "foo".into());
        m.storage.tablet_ids.insert(
            tablet.to_string(),
            TabletEntry::Files(HashMap::from([(
                "000001.sst".to_string(),
                FileEntry {
                    filename: "000001.sst".into(),
                    generation,
                    src_location: "s3://b/k-prev/tablet-a/000001.sst".into(),
                    action: Action::Noop,
                },
            )])),
        );
        m
    }

    proptest! {
        /// A reused file's generation never climbs past `restore_points`:
        /// either it's carried forward at `generation + 1 <= restore_points`,
        /// or it gets promoted and reset to 1 (or to `restore_points - 1` in
        /// the ancestor it was promoted out of).
        #[test]
        fn generation_never_exceeds_restore_points(restore_points in 1u32..8, prior_generation in 1u32..10) {
            let tablet = "a".repeat(32);
            let prev = manifest_with_generation(&tablet, prior_generation);
            let mut manifest = Manifest::new_diff("s3://b/k".into(), "s3".into(), "foo".into(), prev.metadata.manifest_location.clone());
            let mut current = CurrentTabletFiles::new();
            current.insert(tablet.clone(), vec!["/data/000001.sst".into()]);

            plan_diff(&mut manifest, &current, Some(&prev), restore_points, "s3://b/k", |_| None);

            let entry = &manifest.storage.tablet_ids[&tablet].files().unwrap()["000001.sst"];
            prop_assert!(entry.generation <= restore_points);
        }

        /// The planner is a pure function of its inputs: running it twice
        /// from identical state yields identical tablet-file plans.
        #[test]
        fn planner_is_deterministic(restore_points in 1u32..6, prior_generation in 1u32..8, extra_file_count in 0usize..4) {
            let tablet = "a".repeat(32);
            let prev = manifest_with_generation(&tablet, prior_generation);
            let mut current = CurrentTabletFiles::new();
            let mut paths = vec!["/data/000001.sst".to_string()];
            for i in 0..extra_file_count {
                paths.push(format!("/data/new-{i}.sst"));
            }
            current.insert(tablet.clone(), paths);

            let mut first = Manifest::new_diff("s3://b/k".into(), "s3".into(), "foo".into(), prev.metadata.manifest_location.clone());
            plan_diff(&mut first, &current, Some(&prev), restore_points, "s3://b/k", |_| None);

            let mut second = Manifest::new_diff("s3://b/k".into(), "s3".into(), "foo".into(), prev.metadata.manifest_location.clone());
            plan_diff(&mut second, &current, Some(&prev), restore_points, "s3://b/k", |_| None);

            prop_assert_eq!(&first.storage.tablet_ids[&tablet], &second.storage.tablet_ids[&tablet]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;

    fn manifest_with(tablet: &str, entries: Vec<(&str, u32, &str, Action)>) -> Manifest {
        let mut m = Manifest::new_full("s3://b/k-prev".into(), "s3".into(), "foo".into());
        let files = entries
            .into_iter()
            .map(|(f, g, loc, a)| (f.to_string(), FileEntry { filename: f.to_string(), generation: g, src_location: loc.to_string(), action: a }))
            .collect();
        m.storage.tablet_ids.insert(tablet.to_string(), TabletEntry::Files(files));
        m
    }

    #[test]
    fn full_backup_every_file_is_directory_sentinel() {
        let tablet = "a".repeat(32);
        let mut manifest = Manifest::new_full("s3://b/k".into(), "s3".into(), "foo".into());
        let mut current = CurrentTabletFiles::new();
        current.insert(tablet.clone(), vec!["/data/000001.sst".into(), "/data/CURRENT".into()]);

        let plan = plan_diff(&mut manifest, &current, None, 1, "s3://b/k", |_| None);

        assert!(!plan.write_previous_manifests);
        assert!(manifest.storage.tablet_ids.get(&tablet).unwrap().is_directory());
    }

    #[test]
    fn reused_sst_becomes_noop_with_incremented_generation() {
        let tablet = "a".repeat(32);
        let prev = manifest_with(&tablet, vec![("000001.sst", 1, "s3://b/k-prev/tablet-a/000001.sst", Action::Noop)]);
        let mut manifest = Manifest::new_diff("s3://b/k".into(), "s3".into(), "foo".into(), prev.metadata.manifest_location.clone());
        let mut current = CurrentTabletFiles::new();
        current.insert(tablet.clone(), vec!["/data/000001.sst".into()]);

        let plan = plan_diff(&mut manifest, &current, Some(&prev), 5, "s3://b/k", |_| None);

        assert!(!plan.write_previous_manifests);
        let files = manifest.storage.tablet_ids.get(&tablet).unwrap().files().unwrap();
        let entry = &files["000001.sst"];
        assert_eq!(entry.action, Action::Noop);
        assert_eq!(entry.generation, 2);
        assert_eq!(entry.src_location, "s3://b/k-prev/tablet-a/000001.sst");
    }

    #[test]
    fn new_sst_with_no_reusable_sst_triggers_directory_sentinel() {
        let tablet = "a".repeat(32);
        let prev = manifest_with(&tablet, vec![("CURRENT", 1, "s3://b/k-prev/tablet-a/CURRENT", Action::Copy)]);
        let mut manifest = Manifest::new_diff("s3://b/k".into(), "s3".into(), "foo".into(), prev.metadata.manifest_location.clone());
        let mut current = CurrentTabletFiles::new();
        current.insert(tablet.clone(), vec!["/data/000002.sst".into()]);

        plan_diff(&mut manifest, &current, Some(&prev), 5, "s3://b/k", |_| None);

        assert!(manifest.storage.tablet_ids.get(&tablet).unwrap().is_directory());
    }

    #[test]
    fn new_sst_with_reusable_sst_stays_per_file() {
        let tablet = "a".repeat(32);
        let prev = manifest_with(&tablet, vec![("000001.sst", 1, "s3://b/k-prev/tablet-a/000001.sst", Action::Noop)]);
        let mut manifest = Manifest::new_diff("s3://b/k".into(), "s3".into(), "foo".into(), prev.metadata.manifest_location.clone());
        let mut current = CurrentTabletFiles::new();
        current.insert(tablet.clone(), vec!["/data/000001.sst".into(), "/data/000002.sst".into()]);

        plan_diff(&mut manifest, &current, Some(&prev), 5, "s3://b/k", |_| None);

        let files = manifest.storage.tablet_ids.get(&tablet).unwrap().files().unwrap();
        assert_eq!(files["000001.sst"].action, Action::Noop);
        assert_eq!(files["000002.sst"].action, Action::Copy);
    }

    #[test]
    fn generation_exceeding_restore_points_promotes_and_rewrites_ancestor() {
        let tablet = "a".repeat(32);
        let prev = manifest_with(&tablet, vec![("000001.sst", 2, "s3://b/k-prev/tablet-a/000001.sst", Action::Noop)]);
        let prev_location = prev.metadata.manifest_location.clone();
        let mut manifest = Manifest::new_diff("s3://b/k".into(), "s3".into(), "foo".into(), prev_location.clone());
        let mut current = CurrentTabletFiles::new();
        current.insert(tablet.clone(), vec!["/data/000001.sst".into()]);

        let plan = plan_diff(&mut manifest, &current, Some(&prev), 2, "s3://b/k", |_| None);

        assert!(plan.write_previous_manifests);
        let files = manifest.storage.tablet_ids.get(&tablet).unwrap().files().unwrap();
        let entry = &files["000001.sst"];
        assert_eq!(entry.action, Action::Move);
        assert_eq!(entry.generation, 1);
        assert_eq!(entry.src_location, "s3://b/k/tablet-a/000001.sst");

        let rewritten = plan.rewritten_ancestors.get(&prev_location).unwrap();
        let ancestor_entry = &rewritten.storage.tablet_ids.get(&tablet).unwrap().files().unwrap()["000001.sst"];
        assert_eq!(ancestor_entry.src_location, "s3://b/k/tablet-a/000001.sst");
        assert_eq!(ancestor_entry.generation, 1);
    }

    #[test]
    fn promotion_walks_multiple_ancestors_bounded_by_restore_points() {
        let tablet = "a".repeat(32);
        let grandparent = manifest_with(&tablet, vec![("000001.sst", 1, "s3://b/k-gp/tablet-a/000001.sst", Action::Noop)]);
        let grandparent_location = grandparent.metadata.manifest_location.clone();

        let mut parent = manifest_with(&tablet, vec![("000001.sst", 3, "s3://b/k-gp/tablet-a/000001.sst", Action::Noop)]);
        parent.metadata.manifest_previous = grandparent_location.clone();
        let parent_location = parent.metadata.manifest_location.clone();

        let mut manifest = Manifest::new_diff("s3://b/k".into(), "s3".into(), "foo".into(), parent_location.clone());
        let mut current = CurrentTabletFiles::new();
        current.insert(tablet.clone(), vec!["/data/000001.sst".into()]);

        let gp_for_closure = grandparent.clone();
        let plan = plan_diff(&mut manifest, &current, Some(&parent), 3, "s3://b/k", |location| {
            (location == grandparent_location).then(|| gp_for_closure.clone())
        });

        assert!(plan.rewritten_ancestors.contains_key(&parent_location));
        assert!(plan.rewritten_ancestors.contains_key(&grandparent_location));
        let gp_rewritten = &plan.rewritten_ancestors[&grandparent_location];
        assert_eq!(gp_rewritten.storage.tablet_ids[&tablet].files().unwrap()["000001.sst"].src_location, "s3://b/k/tablet-a/000001.sst");
    }

    #[test]
    fn simultaneous_promotion_across_tablets_preserves_both_rewrites() {
        let tablet_a = "a".repeat(32);
        let tablet_b = "b".repeat(32);
        let mut prev = manifest_with(&tablet_a, vec![("000001.sst", 2, "s3://b/k-prev/tablet-a/000001.sst", Action::Noop)]);
        prev.storage.tablet_ids.insert(
            tablet_b.clone(),
            TabletEntry::Files(HashMap::from([(
                "000001.sst".to_string(),
                FileEntry {
                    filename: "000001.sst".into(),
                    generation: 2,
                    src_location: "s3://b/k-prev/tablet-b/000001.sst".into(),
                    action: Action::Noop,
                },
            )])),
        );
        let prev_location = prev.metadata.manifest_location.clone();

        let mut manifest = Manifest::new_diff("s3://b/k".into(), "s3".into(), "foo".into(), prev_location.clone());
        let mut current = CurrentTabletFiles::new();
        current.insert(tablet_a.clone(), vec!["/data/000001.sst".into()]);
        current.insert(tablet_b.clone(), vec!["/data/000001.sst".into()]);

        let plan = plan_diff(&mut manifest, &current, Some(&prev), 2, "s3://b/k", |_| None);

        assert!(plan.write_previous_manifests);
        let rewritten = plan.rewritten_ancestors.get(&prev_location).unwrap();
        let entry_a = &rewritten.storage.tablet_ids[&tablet_a].files().unwrap()["000001.sst"];
        let entry_b = &rewritten.storage.tablet_ids[&tablet_b].files().unwrap()["000001.sst"];
        assert_eq!(entry_a.src_location, "s3://b/k/tablet-a/000001.sst");
        assert_eq!(entry_b.src_location, "s3://b/k/tablet-b/000001.sst");
    }

    #[test]
    fn always_copy_files_are_copy_even_when_name_repeats_across_backups() {
        let tablet = "a".repeat(32);
        let prev = manifest_with(&tablet, vec![("CURRENT", 1, "s3://b/k-prev/tablet-a/CURRENT", Action::Copy)]);
        let mut manifest = Manifest::new_diff("s3://b/k".into(), "s3".into(), "foo".into(), prev.metadata.manifest_location.clone());
        let mut current = CurrentTabletFiles::new();
        current.insert(tablet.clone(), vec!["/data/CURRENT".into(), "/data/000001.sst".into()]);

        plan_diff(&mut manifest, &current, Some(&prev), 5, "s3://b/k", |_| None);

        let files = manifest.storage.tablet_ids.get(&tablet).unwrap().files().unwrap();
        assert_eq!(files["CURRENT"].action, Action::Copy);
        assert_eq!(files["CURRENT"].generation, 1);
    }
}
