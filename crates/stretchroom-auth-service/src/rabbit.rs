//! RabbitMQ methods of the auth service.

use std::convert::Infallible;
use std::sync::Arc;

use stretchroom_infrastructure::JwtGenerator;
use stretchroom_infrastructure::rabbitmq::{RabbitMqController, SimpleRabbitMqConfiguration};

use crate::api::issue_token;
use crate::contracts::{GenerateTokenRequest, rabbit_methods};

/// `ok` answers `"Ok"`; `getjson` issues a token like `POST token`.
pub fn controller(
    configuration: SimpleRabbitMqConfiguration,
    generator: Arc<JwtGenerator>,
) -> RabbitMqController {
    RabbitMqController::new(configuration)
        .register(rabbit_methods::OK, || async { Ok::<_, Infallible>("Ok") })
        .register_with(rabbit_methods::GET_JSON, move |request: GenerateTokenRequest| {
            let generator = generator.clone();
            async move { issue_token(&generator, &request.user_name) }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::GenerateTokenResponse;
    use stretchroom_infrastructure::JwtValidator;
    use stretchroom_infrastructure::rabbitmq::RabbitMqRequest;
    use stretchroom_infrastructure::test_utils::test_jwt_options;

    fn auth_controller() -> RabbitMqController {
        let generator = JwtGenerator::new(test_jwt_options()).unwrap();
        controller(
            SimpleRabbitMqConfiguration::new("amqp://localhost:5672", "auth-exchange", "auth-queue"),
            Arc::new(generator),
        )
    }

    #[tokio::test]
    async fn test_ok_method() {
        let response = auth_controller()
            .handle_request(RabbitMqRequest::new("ok"))
            .await;
        assert_eq!(response.error, None);
        assert_eq!(response.result, Some(serde_json::json!("Ok")));
    }

    #[tokio::test]
    async fn test_getjson_issues_token() {
        let request = RabbitMqRequest::new("getjson")
            .with_param(&GenerateTokenRequest::new("Vitalik"))
            .unwrap();
        let response = auth_controller().handle_request(request).await;

        let body: GenerateTokenResponse = serde_json::from_value(response.result.unwrap()).unwrap();
        let claims = JwtValidator::new(&test_jwt_options())
            .unwrap()
            .validate(&body.token)
            .unwrap();
        assert_eq!(claims.name_id(), Some("Vitalik"));
    }

    #[tokio::test]
    async fn test_getjson_without_params_is_an_error() {
        let response = auth_controller()
            .handle_request(RabbitMqRequest::new("getjson"))
            .await;
        assert!(response.result.is_none());
        assert!(response.error.is_some());
    }
}
