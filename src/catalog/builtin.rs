use super::ModuleDefinition;

const VOCAL_PROCESSING: &str = "Vocal Processing";
const INSTRUMENT_SEPARATION: &str = "Instrument Separation";

pub(super) fn definitions() -> Vec<ModuleDefinition> {
    vec![
        ModuleDefinition::new("vocal_instrumental", "model_bs_roformer_ep_368_sdr_12.9628.ckpt")
            .with_description(VOCAL_PROCESSING, "Separates vocals from instrumentals")
            .with_output("Vocals", "base_vocals")
            .with_output("Instrumental", "base_instrumental"),
        ModuleDefinition::new(
            "lead_backing",
            "mel_band_roformer_karaoke_aufr33_viperx_sdr_10.1956.ckpt",
        )
        .with_description(VOCAL_PROCESSING, "Separates lead vocals from backing vocals")
        .with_dependency("vocal_instrumental", "Vocals")
        .with_output("Vocals", "lead")
        .with_output("Instrumental", "backing"),
        ModuleDefinition::new("male_female", "bs_roformer_male_female_by_aufr33_sdr_7.2889.ckpt")
            .with_description(VOCAL_PROCESSING, "Separates male from female vocals (primary)")
            .with_dependency("vocal_instrumental", "Vocals")
            .with_output("Male", "male")
            .with_output("Female", "female"),
        ModuleDefinition::new(
            "male_female_secondary",
            "model_chorus_bs_roformer_ep_267_sdr_24.1275.ckpt",
        )
        .with_description(VOCAL_PROCESSING, "Separates male from female vocals (alternative)")
        .with_dependency("vocal_instrumental", "Vocals")
        .with_output("Male", "male_secondary")
        .with_output("Female", "female_secondary"),
        ModuleDefinition::new("htdemucs_6s", "htdemucs_6s.yaml")
            .with_description(
                INSTRUMENT_SEPARATION,
                "Separates audio instruments (drums, bass, guitar, piano, other)",
            )
            .with_output("Drums", "htdemucs_6s_drums")
            .with_output("Bass", "htdemucs_6s_bass")
            .with_output("Other", "htdemucs_6s_other")
            .with_output("Guitar", "htdemucs_6s_guitar")
            .with_output("Piano", "htdemucs_6s_piano"),
    ]
}
