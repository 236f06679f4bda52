mod common;

use std::collections::BTreeSet;

use common::chain;
use quakefit::optimization::rundir::Rundir;
use quakefit::{ChainSet, ErrorKind, HarvestOptions, Harvester, WeedLevel, harvest};

/// Global chain plus three bootstrap chains, five distinct samples each.
fn four_chains() -> ChainSet {
    ChainSet {
        chains: vec![
            chain(0, 0, &[1.0, 1.1, 1.2, 1.3, 1.4]),
            chain(1, 100, &[1.05, 1.15, 1.25, 1.35, 1.45]),
            chain(2, 200, &[0.95, 1.0, 1.1, 1.2, 1.3]),
            chain(3, 300, &[1.1, 1.2, 1.3, 1.4, 1.5]),
        ],
    }
}

fn indices(e: &quakefit::Ensemble) -> BTreeSet<u64> {
    e.samples.iter().map(|s| s.index).collect()
}

#[test]
fn level_zero_unions_all_chains_level_three_only_global() {
    let chains = four_chains();

    let all = Harvester::new(5, WeedLevel::None).select(&chains).unwrap();
    assert_eq!(all.len(), 20);
    assert_eq!(all.retained_chains, vec![0, 1, 2, 3]);

    let global = Harvester::new(5, WeedLevel::GlobalOnly).select(&chains).unwrap();
    assert_eq!(global.len(), 5);
    assert!(global.samples.iter().all(|s| s.index < 100));
}

#[test]
fn level_zero_counts_true_duplicates_once() {
    let mut chains = four_chains();
    // bootstrap chain 1 also ranked two of the global chain's samples
    chains.chains[1] = chain(1, 3, &[1.3, 1.4, 1.45, 1.5, 1.55]);
    let e = Harvester::new(5, WeedLevel::None).select(&chains).unwrap();
    assert_eq!(e.len(), 18);
}

#[test]
fn level_one_drops_outlier_chain() {
    let mut chains = four_chains();
    chains.chains[3] = chain(3, 300, &[9.0, 9.5, 10.0, 10.5, 11.0]);

    let level0 = Harvester::new(5, WeedLevel::None).select(&chains).unwrap();
    let level1 = Harvester::new(5, WeedLevel::Chains).select(&chains).unwrap();

    let outlier: BTreeSet<u64> = (300..305).collect();
    assert!(outlier.is_subset(&indices(&level0)));
    assert!(outlier.is_disjoint(&indices(&level1)));
    assert_eq!(level1.len(), 15);
    assert_eq!(level1.retained_chains, vec![0, 1, 2]);
}

#[test]
fn global_chain_is_never_weeded() {
    let chains = ChainSet {
        chains: vec![
            chain(0, 0, &[20.0, 21.0, 22.0]),
            chain(1, 100, &[1.0, 1.1, 1.2]),
            chain(2, 200, &[1.0, 1.1, 1.2]),
            chain(3, 300, &[1.0, 1.1, 1.2]),
        ],
    };
    let e = Harvester::new(3, WeedLevel::Chains).select(&chains).unwrap();
    assert!(e.retained_chains.contains(&0));
}

#[test]
fn level_two_also_drops_samples_above_mean() {
    let mut chains = four_chains();
    chains.chains[3] = chain(3, 300, &[9.0, 9.5, 10.0, 10.5, 11.0]);

    let level2 = Harvester::new(5, WeedLevel::ChainsAndSamples).select(&chains).unwrap();
    let population: Vec<f64> = chains
        .chains
        .iter()
        .flat_map(|c| c.best(5).iter().map(|s| s.global_misfit))
        .collect();
    let mean = population.iter().sum::<f64>() / population.len() as f64;

    assert!(!level2.is_empty());
    assert!(level2.samples.iter().all(|s| s.global_misfit <= mean));
    assert!(level2.samples.iter().all(|s| s.index < 300));
}

#[test]
fn ensemble_is_ordered_by_global_misfit() {
    let e = Harvester::new(5, WeedLevel::None).select(&four_chains()).unwrap();
    for pair in e.samples.windows(2) {
        assert!(pair[0].global_misfit <= pair[1].global_misfit);
        if pair[0].global_misfit == pair[1].global_misfit {
            assert!(pair[0].index < pair[1].index);
        }
    }
}

#[test]
fn rundir_harvest_is_repeatable() {
    let tmp = tempfile::tempdir().unwrap();
    let rd = Rundir::open(tmp.path());
    rd.write_chains(&four_chains()).unwrap();

    let opts = HarvestOptions {
        nbest: 5,
        weed: WeedLevel::Chains,
        ..Default::default()
    };
    let first = harvest(tmp.path(), &opts).unwrap();
    let bytes = std::fs::read(rd.ensemble_path()).unwrap();

    let err = harvest(tmp.path(), &opts).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Harvest);

    let again = harvest(tmp.path(), &HarvestOptions { force: true, ..opts }).unwrap();
    assert_eq!(first, again);
    assert_eq!(std::fs::read(rd.ensemble_path()).unwrap(), bytes);
}

#[test]
fn strict_harvest_reports_short_chains() {
    let tmp = tempfile::tempdir().unwrap();
    let rd = Rundir::open(tmp.path());
    rd.write_chains(&four_chains()).unwrap();

    let lenient = harvest(
        tmp.path(),
        &HarvestOptions {
            nbest: 8,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(lenient.short_chains, vec![0, 1, 2, 3]);
    assert_eq!(lenient.len(), 20);

    let err = harvest(
        tmp.path(),
        &HarvestOptions {
            nbest: 8,
            force: true,
            strict: true,
            ..Default::default()
        },
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Harvest);
}
