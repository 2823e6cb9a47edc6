//! Upstream portal collaborator
//!
//! The portal scraping client lives outside this crate. Satchel only needs
//! two capabilities from it, expressed by the `Portal` trait:
//! - log in with raw credentials and report session facts
//! - read records for one query on behalf of a logged-in session
//!
//! The upstream library cannot resume a session, so callers log in again
//! before every read.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::models::{PortalLogin, PortalQuery, SessionFacts};

/// Failure reported by the portal
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    /// Credentials refused, or identity provider not supported; never retried
    #[error("rejected: {0}")]
    Rejected(String),

    /// Network failure or temporary service error; eligible for retry
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl UpstreamError {
    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::Unavailable(_))
    }
}

/// Portal client capabilities
#[async_trait]
pub trait Portal: Send + Sync {
    /// Log in upstream
    async fn authenticate(&self, login: &PortalLogin) -> Result<SessionFacts, UpstreamError>;

    /// Read records for `query` within the upstream session named by `facts`
    async fn fetch(
        &self,
        facts: &SessionFacts,
        query: &PortalQuery,
    ) -> Result<Vec<Value>, UpstreamError>;
}

/// A regional identity provider usable for CAS logins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IdentityProvider {
    pub id: &'static str,
    pub name: &'static str,
}

const fn provider(id: &'static str, name: &'static str) -> IdentityProvider {
    IdentityProvider { id, name }
}

/// Identity providers accepted for CAS logins
pub const SUPPORTED_PROVIDERS: &[IdentityProvider] = &[
    provider("ac_reunion", "Académie de La Réunion"),
    provider("ac_orleans_tours", "Académie Orléans-Tours"),
    provider("ac_rennes", "Académie de Rennes"),
    provider("ac_reims", "Académie de Reims"),
    provider("ac_montpellier", "Académie de Montpellier"),
    provider("arsene76", "Arsene76 (Seine-Maritime)"),
    provider("atrium_sud", "Atrium Sud (PACA)"),
    provider("cas_kosmos", "CAS Kosmos"),
    provider("eclat_bfc", "Eclat-BFC (Bourgogne-Franche-Comté)"),
    provider("ent27", "ENT27 (Eure)"),
    provider("ent77", "ENT77 (Seine-et-Marne)"),
    provider("ent_94", "ENT94 (Val-de-Marne)"),
    provider("ent_creuse", "ENT Creuse"),
    provider("ent_elyco", "e-lyco (Pays de la Loire)"),
    provider("ent_essonne", "ENT Essonne"),
    provider("ent_hdf", "ENT Hauts-de-France"),
    provider("ent_somme", "ENT Somme"),
    provider("ent_var", "ENT Var"),
    provider("l_normandie", "L'Educ de Normandie"),
    provider("laclasse_lyon", "Laclasse.com (Lyon)"),
    provider("lyceeconnecte_aquitaine", "Lycée Connecté (Nouvelle-Aquitaine)"),
    provider("lyceeconnecte_edu", "Lycée Connecté"),
    provider("mon_bureau_numerique", "Mon Bureau Numérique (Grand Est)"),
    provider("monlycee_net", "Mon lycée.net (Île-de-France)"),
    provider("neotech_occitanie", "Néo (Occitanie)"),
    provider("paris_classe_numerique", "Paris Classe Numérique"),
    provider("toutatice", "Toutatice (Bretagne)"),
    provider("webcollege_cantal", "Webcollège Cantal"),
];

/// Look up a provider by id, ignoring case
pub fn find_provider(id: &str) -> Option<&'static IdentityProvider> {
    SUPPORTED_PROVIDERS
        .iter()
        .find(|provider| provider.id.eq_ignore_ascii_case(id.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_provider() {
        assert_eq!(find_provider("monlycee_net").unwrap().name, "Mon lycée.net (Île-de-France)");
        assert!(find_provider("TOUTATICE").is_some());
        assert!(find_provider("moodle").is_none());
    }

    #[test]
    fn test_provider_ids_are_unique() {
        let mut ids: Vec<_> = SUPPORTED_PROVIDERS.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), SUPPORTED_PROVIDERS.len());
        assert_eq!(ids.len(), 28);
    }

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(UpstreamError::Unavailable("timeout".into()).is_transient());
        assert!(!UpstreamError::Rejected("bad password".into()).is_transient());
    }
}
