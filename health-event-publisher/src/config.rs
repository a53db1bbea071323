use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // JSON document holding the `ha` config index
    #[envconfig(default = "/etc/cortx/ha/ha.conf.json")]
    pub ha_config_file: String,

    pub events_file: String,

    #[envconfig(default = "health_event_generator")]
    pub producer_id: String,

    // Partitions used if the health message type has to be registered
    #[envconfig(default = "1")]
    pub message_type_partitions: i32,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn only_the_events_file_is_required() {
        assert!(Config::init_from_hashmap(&HashMap::new()).is_err());

        let env = HashMap::from([("EVENTS_FILE".to_string(), "/tmp/events.json".to_string())]);
        let config = Config::init_from_hashmap(&env).unwrap();

        assert_eq!(config.events_file, "/tmp/events.json");
        assert_eq!(config.producer_id, "health_event_generator");
        assert_eq!(config.ha_config_file, "/etc/cortx/ha/ha.conf.json");
        assert_eq!(config.message_type_partitions, 1);
    }
}
