//! Static catalog of the tomato leaf classes the classifier knows about.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Recommendations handed out when a label has no catalog entry.
pub const FALLBACK_RECOMMENDATIONS: &[&str] = &[
    "Consulter un expert agronome",
    "Isoler la plante affectée",
    "Surveiller l'évolution",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiseaseClass {
    #[serde(rename = "Tomato_bacterial_spot")]
    BacterialSpot,
    #[serde(rename = "Tomato_early_blight")]
    EarlyBlight,
    #[serde(rename = "Tomato_healthy")]
    Healthy,
    #[serde(rename = "Tomato_late_blight")]
    LateBlight,
    #[serde(rename = "Tomato_leaf_mold")]
    LeafMold,
    #[serde(rename = "Tomato_septoria_leaf_spot")]
    SeptoriaLeafSpot,
    #[serde(rename = "Tomato_spider_mites_two-spotted_spider_mite")]
    SpiderMites,
    #[serde(rename = "Tomato_target_spot")]
    TargetSpot,
    #[serde(rename = "Tomato_mosaic_virus")]
    MosaicVirus,
    #[serde(rename = "Tomato_yellow_leaf_curl_virus")]
    YellowLeafCurlVirus,
}

impl DiseaseClass {
    /// Every class, in the order the serving model emits them.
    pub const ALL: [DiseaseClass; 10] = [
        DiseaseClass::BacterialSpot,
        DiseaseClass::EarlyBlight,
        DiseaseClass::Healthy,
        DiseaseClass::LateBlight,
        DiseaseClass::LeafMold,
        DiseaseClass::SeptoriaLeafSpot,
        DiseaseClass::SpiderMites,
        DiseaseClass::TargetSpot,
        DiseaseClass::MosaicVirus,
        DiseaseClass::YellowLeafCurlVirus,
    ];

    pub fn label(self) -> &'static str {
        match self {
            DiseaseClass::BacterialSpot => "Tomato_bacterial_spot",
            DiseaseClass::EarlyBlight => "Tomato_early_blight",
            DiseaseClass::Healthy => "Tomato_healthy",
            DiseaseClass::LateBlight => "Tomato_late_blight",
            DiseaseClass::LeafMold => "Tomato_leaf_mold",
            DiseaseClass::SeptoriaLeafSpot => "Tomato_septoria_leaf_spot",
            DiseaseClass::SpiderMites => "Tomato_spider_mites_two-spotted_spider_mite",
            DiseaseClass::TargetSpot => "Tomato_target_spot",
            DiseaseClass::MosaicVirus => "Tomato_mosaic_virus",
            DiseaseClass::YellowLeafCurlVirus => "Tomato_yellow_leaf_curl_virus",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.label() == label)
    }

    /// French name shown to growers.
    pub fn display_name_fr(self) -> &'static str {
        match self {
            DiseaseClass::Healthy => "Sain",
            DiseaseClass::BacterialSpot => "Tache bactérienne",
            DiseaseClass::EarlyBlight => "Mildiou précoce",
            DiseaseClass::LateBlight => "Mildiou tardif",
            DiseaseClass::LeafMold => "Moisissure des feuilles",
            DiseaseClass::SeptoriaLeafSpot => "Tache septorienne",
            DiseaseClass::SpiderMites => "Acariens",
            DiseaseClass::TargetSpot => "Tache cible",
            DiseaseClass::MosaicVirus => "Virus de la mosaïque",
            DiseaseClass::YellowLeafCurlVirus => "Virus de l'enroulement jaune",
        }
    }

    pub fn recommendations(self) -> &'static [&'static str] {
        match self {
            DiseaseClass::Healthy => &[
                "Plante saine, continuer les soins habituels",
                "Surveiller régulièrement vos plantes",
                "Maintenir un bon drainage",
            ],
            DiseaseClass::BacterialSpot => &[
                "Retirer les feuilles infectées",
                "Appliquer un fongicide adapté",
                "Éviter l'arrosage par aspersion",
                "Nettoyer les outils de taille",
            ],
            DiseaseClass::EarlyBlight => &[
                "Retirer les feuilles touchées",
                "Traiter avec fongicide préventif",
                "Améliorer la circulation d'air",
                "Pailler le sol pour éviter les éclaboussures",
            ],
            DiseaseClass::LateBlight => &[
                "Isoler la plante immédiatement",
                "Appliquer un fongicide systémique",
                "Détruire les parties infectées",
                "Éviter l'humidité excessive",
            ],
            DiseaseClass::LeafMold => &[
                "Améliorer la ventilation",
                "Réduire l'humidité",
                "Espacer les plants",
                "Tailler pour aérer",
            ],
            DiseaseClass::SeptoriaLeafSpot => &[
                "Supprimer les feuilles malades",
                "Traitement fongicide préventif",
                "Éviter de mouiller le feuillage",
                "Rotation des cultures",
            ],
            DiseaseClass::SpiderMites => &[
                "Pulvériser insecticide adapté",
                "Maintenir humidité élevée",
                "Utiliser des acariens prédateurs",
                "Nettoyer régulièrement les feuilles",
            ],
            DiseaseClass::TargetSpot => &[
                "Enlever les feuilles infectées",
                "Appliquer fongicide local",
                "Améliorer le drainage",
                "Espacer les plantations",
            ],
            DiseaseClass::MosaicVirus => &[
                "Isoler la plante infectée",
                "Détruire les plants gravement atteints",
                "Désinfecter tous les outils",
                "Contrôler les insectes vecteurs",
            ],
            DiseaseClass::YellowLeafCurlVirus => &[
                "Isoler la plante",
                "Contrôler les insectes vecteurs (aleurodes)",
                "Utiliser des filets anti-insectes",
                "Détruire les plants trop atteints",
            ],
        }
    }

    pub fn requires_watering(self) -> bool {
        matches!(
            self,
            DiseaseClass::Healthy
                | DiseaseClass::EarlyBlight
                | DiseaseClass::LateBlight
                | DiseaseClass::BacterialSpot
        )
    }

    pub fn is_healthy(self) -> bool {
        self == DiseaseClass::Healthy
    }
}

impl fmt::Display for DiseaseClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Labels in catalog order, used when no class list accompanies the model.
pub fn default_labels() -> Vec<String> {
    DiseaseClass::ALL
        .iter()
        .map(|class| class.label().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_class_has_recommendations() {
        for class in DiseaseClass::ALL {
            assert!(!class.recommendations().is_empty(), "{class} has none");
            assert!(!class.display_name_fr().is_empty());
        }
    }

    #[test]
    fn watering_set_is_fixed() {
        let watered: Vec<_> = DiseaseClass::ALL
            .into_iter()
            .filter(|class| class.requires_watering())
            .collect();
        assert_eq!(
            watered,
            vec![
                DiseaseClass::BacterialSpot,
                DiseaseClass::EarlyBlight,
                DiseaseClass::Healthy,
                DiseaseClass::LateBlight,
            ]
        );
    }

    #[test]
    fn labels_resolve_back_to_classes() {
        assert_eq!(
            DiseaseClass::from_label("Tomato_spider_mites_two-spotted_spider_mite"),
            Some(DiseaseClass::SpiderMites)
        );
        assert_eq!(DiseaseClass::from_label("Potato_late_blight"), None);
        assert_eq!(default_labels().len(), 10);
        assert_eq!(default_labels()[2], "Tomato_healthy");
    }

    #[test]
    fn serde_uses_the_wire_label() {
        let json = serde_json::to_string(&DiseaseClass::MosaicVirus).unwrap();
        assert_eq!(json, "\"Tomato_mosaic_virus\"");
    }
}
