use iocraft::prelude::*;
use tokio::sync::watch;

#[derive(Default, Props)]
pub struct ProgressBarProps {
    pub title: String,
    /// Percentage in `0.0..=100.0`.
    pub progress: Option<watch::Receiver<f32>>,
}

#[component]
pub fn ProgressBar(props: &ProgressBarProps, mut hooks: Hooks) -> impl Into<AnyElement<'static>> {
    let mut percent = hooks.use_state(|| 0.0f32);
    let receiver = props.progress.clone();

    hooks.use_future(async move {
        if let Some(mut receiver) = receiver {
            while receiver.changed().await.is_ok() {
                let value = *receiver.borrow();
                percent.set(value);
            }
        }
    });

    element! {
        View(flex_direction: FlexDirection::Column) {
            Text(weight: Weight::Bold, content: &props.title)
            View(flex_direction: FlexDirection::Row) {
                View(border_style: BorderStyle::Round, border_color: Color::Blue, width: 60) {
                    View(width: Percent(percent.get()), height: 1, background_color: Color::Green)
                }
                View(padding: 1) {
                    Text(content: format!("{:.0}%", percent.get()))
                }
            }
        }
    }
}

#[derive(Default, Props)]
pub struct MessageProps {
    pub message: String,
}

#[component]
pub fn SuccessMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Green, content: "◆ ")
            Text(content: &props.message)
        }
    }
}

#[component]
pub fn ErrorMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Red, content: "▲ ")
            Text(color: Color::Red, content: &props.message)
        }
    }
}

#[derive(Default, Props)]
pub struct InputPromptProps {
    pub prompt: String,
    pub default: Option<String>,
    pub description: Option<String>,
}

#[component]
pub fn InputPrompt(props: &InputPromptProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Column) {
            View(flex_direction: FlexDirection::Row) {
                Text(weight: Weight::Bold, content: &props.prompt)
                #(props.default.as_ref().map(|default| element! {
                    Text(color: Color::DarkGrey, content: format!(" [{}]", default))
                }))
            }
            #(props.description.as_ref().map(|description| element! {
                Text(color: Color::DarkGrey, content: description.clone())
            }))
        }
    }
}

#[component]
pub fn ConfigHeader() -> impl Into<AnyElement<'static>> {
    element! {
        View(border_style: BorderStyle::Round, border_color: Color::Blue) {
            Text(weight: Weight::Bold, content: "bitsend configuration")
        }
    }
}
