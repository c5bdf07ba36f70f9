use log::debug;

use crate::domain::DomainSet;
use crate::image::ImageManifest;

/// Outcome of pruning: the resources that stay in the image and the ones
/// taken out for disabled domains.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrunedImage {
    pub retained: ImageManifest,
    pub removed_programs: Vec<String>,
    pub removed_maps: Vec<String>,
}

/// Drops every program and map that belongs to a disabled domain.
///
/// Idempotent, and names that are already gone are ignored.
pub fn prune(manifest: &ImageManifest, enabled: &DomainSet) -> PrunedImage {
    let mut retained = manifest.clone();
    let mut removed_programs = Vec::new();
    let mut removed_maps = Vec::new();

    retained.programs.retain(|name, domain| {
        let keep = enabled.contains(*domain);
        if !keep {
            removed_programs.push(name.clone());
        }
        keep
    });
    retained.maps.retain(|name, domain| {
        let keep = enabled.contains(*domain);
        if !keep {
            removed_maps.push(name.clone());
        }
        keep
    });

    debug!(
        "Pruned {} programs and {} maps for domains outside {:?}",
        removed_programs.len(),
        removed_maps.len(),
        enabled
    );

    PrunedImage {
        retained,
        removed_programs,
        removed_maps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TraceDomain;

    fn all_subsets() -> impl Iterator<Item = DomainSet> {
        let optional = [
            TraceDomain::Rpc,
            TraceDomain::FileIo,
            TraceDomain::Operations,
            TraceDomain::Nfsd,
            TraceDomain::Xdp,
        ];
        (0u32..(1 << optional.len())).map(move |mask| {
            optional
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, d)| *d)
                .collect()
        })
    }

    #[test]
    fn test_prune_retains_exactly_enabled_domains() {
        let manifest = ImageManifest::nfsdig();
        for enabled in all_subsets() {
            let pruned = prune(&manifest, &enabled);

            for (name, domain) in &manifest.programs {
                assert_eq!(
                    pruned.retained.has_program(name),
                    enabled.contains(*domain),
                    "{name} with {enabled:?}"
                );
            }
            for (name, domain) in &manifest.maps {
                assert_eq!(
                    pruned.retained.has_map(name),
                    enabled.contains(*domain),
                    "{name} with {enabled:?}"
                );
            }
            assert!(pruned.retained.has_map(crate::image::ERROR_EVENTS_MAP));
            assert_eq!(
                pruned.removed_programs.len() + pruned.retained.programs.len(),
                manifest.programs.len()
            );
        }
    }

    #[test]
    fn test_prune_is_idempotent() {
        let manifest = ImageManifest::nfsdig();
        let enabled = DomainSet::new().with(TraceDomain::Operations);

        let once = prune(&manifest, &enabled);
        let twice = prune(&once.retained, &enabled);

        assert_eq!(once.retained, twice.retained);
        assert!(twice.removed_programs.is_empty());
        assert!(twice.removed_maps.is_empty());
    }

    #[test]
    fn test_prune_missing_names_is_not_an_error() {
        let pruned = prune(&ImageManifest::default(), &DomainSet::new());
        assert!(pruned.retained.programs.is_empty());
        assert!(pruned.removed_maps.is_empty());
    }
}
