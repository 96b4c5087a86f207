use crate::{Role, WireMessage};

pub const SYSTEM_PROMPT: &str = "You are a GeoGebra command generator. When the user describes a geometric figure, \
explain how to construct it step by step, numbering the steps 1. 2. 3. on separate lines and describing your reasoning. \
Then give the GeoGebra commands in a single fenced block, one command per line, for example:\n\
```\nA(0,0)\nB(1,0)\nC(0.5, sqrt(3)/2)\nPolygon[A,B,C]\n```\n\
Do not put anything other than commands inside the block, and never use ``` inside the step descriptions.";

// (user, assistant) pairs shown to the model before the live conversation.
const FEW_SHOT: [(&str, &str); 3] = [
    (
        "Draw an equilateral triangle ABC.",
        "Let's think step by step.\n\
1. Place point A at the origin (0, 0).\n\
2. Place point B at (1, 0); AB is one side of the triangle.\n\
3. C is equidistant from A and B at 60 degrees, so C = (0.5, sqrt(3)/2).\n\
4. Join A, B and C with Polygon.\n\
```\nA(0,0)\nB(1,0)\nC(0.5, sqrt(3)/2)\nPolygon[A,B,C]\n```",
    ),
    (
        "Draw a cylinder with base radius 3 and height 4.",
        "1. Put the centre of the base circle at (0, 0, 0).\n\
2. Put the centre of the top face at (0, 0, 4) so the height is 4.\n\
3. Use Cylinder with the two centres and radius 3.\n\
```\nA(0,0,0)\nB(0,0,4)\nCylinder(A, B, 3)\n```",
    ),
    (
        "Draw a quadrilateral ABCD with AB = CD = 3 and BC = AD = 4.",
        "1. Place A at (0, 0).\n\
2. AB has length 3, so B = (3, 0).\n\
3. BC has length 4 and is perpendicular to AB, so C = (3, 4).\n\
4. AD has length 4, so D = (0, 4).\n\
5. Join the four points with Polygon.\n\
```\nA(0,0)\nB(3,0)\nC(3,4)\nD(0,4)\nPolygon[A,B,C,D]\n```",
    ),
];

/// The messages every conversation starts with before any user input.
pub fn preamble() -> Vec<WireMessage> {
    let mut messages = vec![
        WireMessage::new(Role::System, SYSTEM_PROMPT),
        WireMessage::new(Role::Assistant, "Sure, I will follow all rules."),
    ];
    for (question, answer) in FEW_SHOT {
        messages.push(WireMessage::new(Role::User, question));
        messages.push(WireMessage::new(Role::Assistant, answer));
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::extract_commands;

    #[test]
    fn test_preamble_alternates_after_system_prompt() {
        let messages = preamble();
        assert_eq!(messages[0].role, Role::System);
        for pair in messages[2..].chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
        }
    }

    #[test]
    fn test_few_shot_answers_carry_commands() {
        for message in preamble().iter().filter(|m| m.role == Role::Assistant).skip(1) {
            assert!(!extract_commands(&message.content).is_empty(), "{}", message.content);
        }
    }
}
