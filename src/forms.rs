use crate::connector_proto::{
    form_field::Field, ConditionalFields, ConfigurationFormResponse, ConfigurationTest,
    DescriptiveDropdownField, DescriptiveDropdownFields, DropdownField, FormField, TextField,
    ToggleField, UploadField, VisibilityCondition,
};

/// Static configuration forms for both connectors. Conditional groups become
/// visible when the named dropdown field carries the matching value.

pub fn source_configuration_form() -> ConfigurationFormResponse {
    let api_key = password_field("api_key", "API Key", "your_api_key_here");
    let client_id = password_field("client_id", "Client ID", "your_client_id_here");
    let client_secret = password_field("client_secret", "Client Secret", "your_client_secret_here");
    let username = text_field("username", "Username", "your_username_here");
    let password = password_field("password", "Password", "your_password_here");

    ConfigurationFormResponse {
        schema_selection_supported: true,
        table_selection_supported: true,
        fields: vec![
            FormField {
                description: Some("Base URL of the API to connect to".to_string()),
                required: true,
                ..text_field("apiBaseURL", "API base URL", "api_base_url")
            },
            dropdown_field(
                "authenticationMethod",
                "Authentication Method",
                &["OAuth2.0", "API Key", "Basic Auth", "None"],
                "None",
            ),
            conditional_group(
                "conditionalOAuthFields",
                "OAuth2.0 Conditional Fields",
                "authenticationMethod",
                "OAuth2.0",
                vec![client_id, client_secret],
            ),
            conditional_group(
                "conditionalApiKeyFields",
                "API Key Conditional Fields",
                "authenticationMethod",
                "API Key",
                vec![api_key],
            ),
            conditional_group(
                "conditionalBasicAuthFields",
                "Basic Auth Conditional Fields",
                "authenticationMethod",
                "Basic Auth",
                vec![username, password],
            ),
            dropdown_field("apiVersion", "API Version", &["v1", "v2", "v3"], "v2"),
            toggle_field("shouldEnableMetrics", "Enable Metrics?", None),
        ],
        tests: standard_tests(),
    }
}

pub fn destination_configuration_form() -> ConfigurationFormResponse {
    let host = text_field("host", "Host", "your_host_details");
    let port = text_field("port", "Port", "your_port_details");
    let user = text_field("user", "User", "user_name");
    let password = password_field("password", "Password", "your_password");
    let database = text_field("database", "Database", "your_database_name");
    let table = text_field("table", "Table", "your_table_name");
    let file_path = text_field("filePath", "File Path", "your_file_path");
    let region = dropdown_field(
        "region",
        "Cloud Region",
        &["Azure", "AWS", "Google Cloud"],
        "Azure",
    );

    ConfigurationFormResponse {
        schema_selection_supported: true,
        table_selection_supported: true,
        fields: vec![
            FormField {
                description: Some("Choose the destination type".to_string()),
                ..dropdown_field(
                    "writerType",
                    "Writer Type",
                    &["Database", "File", "Cloud"],
                    "Database",
                )
            },
            conditional_group(
                "conditionalFieldsForDatabase",
                "Conditional fields for database",
                "writerType",
                "Database",
                vec![
                    host.clone(),
                    port.clone(),
                    user.clone(),
                    password.clone(),
                    database,
                    table.clone(),
                ],
            ),
            conditional_group(
                "conditionalFieldsForFile",
                "Conditional fields for file",
                "writerType",
                "File",
                vec![
                    host.clone(),
                    port.clone(),
                    user.clone(),
                    password.clone(),
                    table,
                    file_path,
                ],
            ),
            conditional_group(
                "conditionalFieldsForCloud",
                "Conditional fields for cloud",
                "writerType",
                "Cloud",
                vec![host, port, user, password, region],
            ),
            toggle_field(
                "enableEncryption",
                "Enable Encryption?",
                Some("Enable or disable encryption for data transfer"),
            ),
            FormField {
                description: Some(
                    "Select the pooling strategy for managing database connections".to_string(),
                ),
                required: true,
                default_value: Some("standard_pooling".to_string()),
                field: Some(Field::DescriptiveDropdownFields(DescriptiveDropdownFields {
                    descriptive_dropdown_field: vec![
                        descriptive_option(
                            "Basic Pooling",
                            "basic_pooling",
                            "Provides minimal connection reuse and low resource overhead.",
                        ),
                        descriptive_option(
                            "Standard Pooling",
                            "standard_pooling",
                            "Balances connection reuse and performance for typical workloads.",
                        ),
                        descriptive_option(
                            "Advanced Pooling",
                            "advanced_pooling",
                            "Uses intelligent algorithms to optimize performance for high concurrency and throughput.",
                        ),
                    ],
                })),
                ..named("poolingStrategy", "Connection Pooling Strategy")
            },
            FormField {
                description: Some(
                    "Upload a configuration file (e.g. JSON, YAML, or certificate)".to_string(),
                ),
                field: Some(Field::UploadField(UploadField {
                    allowed_file_type: [".json", ".yaml", ".yml", ".pem", ".crt"]
                        .iter()
                        .map(|ext| ext.to_string())
                        .collect(),
                    max_file_size_bytes: 1_048_576,
                })),
                ..named("uploadFile", "Upload Configuration File")
            },
        ],
        tests: standard_tests(),
    }
}

fn standard_tests() -> Vec<ConfigurationTest> {
    vec![
        ConfigurationTest {
            name: "connect".to_string(),
            label: "Tests connection".to_string(),
        },
        ConfigurationTest {
            name: "select".to_string(),
            label: "Tests selection".to_string(),
        },
    ]
}

fn named(name: &str, label: &str) -> FormField {
    FormField {
        name: name.to_string(),
        label: label.to_string(),
        description: None,
        required: false,
        default_value: None,
        placeholder: String::new(),
        field: None,
    }
}

fn text_field(name: &str, label: &str, placeholder: &str) -> FormField {
    FormField {
        placeholder: placeholder.to_string(),
        field: Some(Field::TextField(TextField::PlainText as i32)),
        ..named(name, label)
    }
}

fn password_field(name: &str, label: &str, placeholder: &str) -> FormField {
    FormField {
        placeholder: placeholder.to_string(),
        field: Some(Field::TextField(TextField::Password as i32)),
        ..named(name, label)
    }
}

fn toggle_field(name: &str, label: &str, description: Option<&str>) -> FormField {
    FormField {
        description: description.map(str::to_string),
        field: Some(Field::ToggleField(ToggleField {})),
        ..named(name, label)
    }
}

fn descriptive_option(label: &str, value: &str, description: &str) -> DescriptiveDropdownField {
    DescriptiveDropdownField {
        label: label.to_string(),
        value: value.to_string(),
        description: description.to_string(),
    }
}

fn dropdown_field(name: &str, label: &str, options: &[&str], default: &str) -> FormField {
    FormField {
        default_value: Some(default.to_string()),
        field: Some(Field::DropdownField(DropdownField {
            dropdown_field: options.iter().map(|opt| opt.to_string()).collect(),
        })),
        ..named(name, label)
    }
}

fn conditional_group(
    name: &str,
    label: &str,
    condition_field: &str,
    string_value: &str,
    fields: Vec<FormField>,
) -> FormField {
    FormField {
        field: Some(Field::ConditionalFields(ConditionalFields {
            condition: Some(VisibilityCondition {
                condition_field: condition_field.to_string(),
                string_value: string_value.to_string(),
            }),
            fields,
        })),
        ..named(name, label)
    }
}
