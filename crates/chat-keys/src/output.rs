use serde::Serialize;

/// Prints results either for humans or as one JSON object per line.
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn success<T: Serialize>(&self, command: &str, data: T) {
        if self.json {
            print_json(&JsonResponse {
                status: "ok",
                command,
                data: Some(data),
                error: None,
            });
        } else {
            match serde_json::to_string_pretty(&data) {
                Ok(text) => println!("{text}"),
                Err(e) => eprintln!("Error: {e}"),
            }
        }
    }

    pub fn success_message(&self, command: &str, message: &str) {
        if self.json {
            print_json(&JsonResponse {
                status: "ok",
                command,
                data: Some(serde_json::json!({ "message": message })),
                error: None,
            });
        } else {
            println!("{message}");
        }
    }

    pub fn error(&self, message: &str) {
        if self.json {
            let response: JsonResponse<()> = JsonResponse {
                status: "error",
                command: "",
                data: None,
                error: Some(message.to_string()),
            };
            if let Ok(line) = serde_json::to_string(&response) {
                eprintln!("{line}");
            }
        } else {
            eprintln!("Error: {message}");
        }
    }
}

fn print_json<T: Serialize>(response: &JsonResponse<'_, T>) {
    match serde_json::to_string(response) {
        Ok(line) => println!("{line}"),
        Err(e) => eprintln!("Error: {e}"),
    }
}

#[derive(Serialize)]
struct JsonResponse<'a, T: Serialize> {
    status: &'a str,
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}
